//! # coai-settings
//!
//! Layered configuration for the COAI service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`CoaiSettings::default()`])
//! 2. **User file** (`~/.coai/settings.json`, deep-merged over defaults)
//! 3. **Environment variables** (`COAI_*` plus the legacy unprefixed names)
//!
//! The OpenAI API key is only ever read from `OPENAI_API_KEY`.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{coai_home, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
