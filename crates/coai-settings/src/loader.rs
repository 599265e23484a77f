//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CoaiSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{ApiKey, CoaiSettings, UsageBackend};

/// `~/.coai`, or `/tmp/.coai` when `HOME` is unset.
pub fn coai_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".coai")
}

pub fn settings_path() -> PathBuf {
    coai_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CoaiSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<CoaiSettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<CoaiSettings> {
    let defaults = serde_json::to_value(CoaiSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut CoaiSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup.
///
/// Where a `COAI_*` name and a legacy unprefixed name both exist, the
/// prefixed one wins. Invalid values are ignored with a warning.
pub fn apply_overrides(settings: &mut CoaiSettings, env: &dyn Fn(&str) -> Option<String>) {
    let r = Reader { env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = r.string(&["COAI_HOST"]) {
        settings.server.host = v;
    }
    if let Some(v) = r.u64(&["COAI_PORT"], 1, 65535) {
        settings.server.port = v as u16;
    }

    // ── Rate limit ──────────────────────────────────────────────────
    if let Some(v) = r.u64(&["COAI_RATE_LIMIT_REQUESTS", "RATE_LIMIT_REQUESTS"], 1, 1_000_000) {
        settings.rate_limit.requests = v as usize;
    }
    if let Some(v) = r.u64(&["COAI_RATE_LIMIT_WINDOW", "RATE_LIMIT_WINDOW"], 1, 604_800) {
        settings.rate_limit.window_secs = v;
    }
    if let Some(v) = r.u64(&["COAI_RATE_LIMIT_BLOCK"], 0, 604_800) {
        settings.rate_limit.block_secs = v;
    }

    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = r.u64(&["COAI_CACHE_TTL"], 0, 86_400) {
        settings.cache.ttl_secs = v;
    }
    if let Some(v) = r.u64(&["COAI_CACHE_MAX_ENTRIES"], 1, 1_000_000) {
        settings.cache.max_entries = v as usize;
    }
    if let Some(v) = r.u64(&["COAI_CACHE_EVICT_BATCH"], 1, 1_000_000) {
        settings.cache.evict_batch = v as usize;
    }

    // ── Rules ───────────────────────────────────────────────────────
    if let Some(v) = r.string(&["COAI_RULES_PATH"]) {
        settings.rules.system_path = PathBuf::from(v);
    }
    if let Some(v) = r.string(&["COAI_PROJECTS_ROOT"]) {
        settings.rules.projects_root = Some(PathBuf::from(v));
    }

    // ── Agents ──────────────────────────────────────────────────────
    if let Some(v) = r.string(&["COAI_DEFAULT_AGENT", "DEFAULT_AI_AGENT"]) {
        settings.agents.default_agent = v;
    }
    if let Some(v) = r.bool(&["COAI_ENABLE_REAL_AI", "ENABLE_REAL_AI"]) {
        settings.agents.enable_real_ai = v;
    }
    if let Some(v) = r.u64(&["COAI_DISPATCH_TIMEOUT"], 1, 3600) {
        settings.agents.dispatch_timeout_secs = v;
    }
    if let Some(v) = r.string(&["OPENAI_API_BASE"]) {
        settings.agents.openai.api_base_url = v;
    }
    if let Some(v) = r.string(&["OPENAI_MODEL"]) {
        settings.agents.openai.model = v;
    }
    if let Some(v) = r.u64(&["OPENAI_MAX_TOKENS"], 1, 128_000) {
        settings.agents.openai.max_tokens = v as u32;
    }
    if let Some(v) = r.f64(&["OPENAI_TEMPERATURE"], 0.0, 2.0) {
        settings.agents.openai.temperature = v;
    }
    if let Some(v) = r.string(&["OPENAI_API_KEY"]) {
        settings.agents.openai.api_key = Some(ApiKey(SecretString::from(v)));
    }

    // ── Orchestrator ────────────────────────────────────────────────
    if let Some(v) = r.u64(&["COAI_MAX_MESSAGE_LENGTH", "MAX_MESSAGE_LENGTH"], 1, 1_000_000) {
        settings.orchestrator.max_message_length = v as usize;
    }

    // ── Usage / telemetry ───────────────────────────────────────────
    if let Some(v) = r.string(&["COAI_USAGE_DIR"]) {
        settings.usage.data_dir = PathBuf::from(v);
    }
    if let Some(v) = r.string(&["COAI_USAGE_BACKEND"]) {
        match parse_backend(&v) {
            Some(b) => settings.usage.backend = b,
            None => tracing::warn!(key = "COAI_USAGE_BACKEND", value = %v, "unknown usage backend, ignoring"),
        }
    }
    if let Some(v) = r.string(&["COAI_LOG_LEVEL"]) {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = r.bool(&["COAI_LOG_TO_SQLITE"]) {
        settings.telemetry.log_to_sqlite = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

pub fn parse_backend(val: &str) -> Option<UsageBackend> {
    match val.to_lowercase().as_str() {
        "json" => Some(UsageBackend::Json),
        "sqlite" => Some(UsageBackend::Sqlite),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct Reader<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl Reader<'_> {
    /// First non-empty value among `names`, with the name it came from.
    fn first(&self, names: &[&'static str]) -> Option<(&'static str, String)> {
        names
            .iter()
            .find_map(|n| (self.env)(n).filter(|v| !v.is_empty()).map(|v| (*n, v)))
    }

    fn string(&self, names: &[&'static str]) -> Option<String> {
        self.first(names).map(|(_, v)| v)
    }

    fn bool(&self, names: &[&'static str]) -> Option<bool> {
        let (key, val) = self.first(names)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, names: &[&'static str], min: u64, max: u64) -> Option<u64> {
        let (key, val) = self.first(names)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn f64(&self, names: &[&'static str], min: f64, max: f64) -> Option<f64> {
        let (key, val) = self.first(names)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key, value = %val, "invalid float env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use crate::errors::SettingsError;

    fn overrides(pairs: &[(&str, &str)]) -> CoaiSettings {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let mut s = CoaiSettings::default();
        apply_overrides(&mut s, &|name| map.get(name).cloned());
        s
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 5000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = merge_file(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.port, 5000);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"rate_limit": {"requests": 5}, "usage": {"backend": "sqlite"}}"#,
        )
        .unwrap();
        let s = merge_file(&path).unwrap();
        assert_eq!(s.rate_limit.requests, 5);
        assert_eq!(s.rate_limit.window_secs, 3600);
        assert_eq!(s.usage.backend, UsageBackend::Sqlite);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(merge_file(&path), Err(SettingsError::Json(_))));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn prefixed_name_beats_legacy_name() {
        let s = overrides(&[("COAI_RATE_LIMIT_REQUESTS", "7"), ("RATE_LIMIT_REQUESTS", "9")]);
        assert_eq!(s.rate_limit.requests, 7);
        let s = overrides(&[("RATE_LIMIT_REQUESTS", "9")]);
        assert_eq!(s.rate_limit.requests, 9);
    }

    #[test]
    fn out_of_range_values_ignored() {
        let s = overrides(&[("COAI_PORT", "70000"), ("OPENAI_TEMPERATURE", "3.5")]);
        assert_eq!(s.server.port, 5000);
        assert_eq!(s.agents.openai.temperature, 0.7);
    }

    #[test]
    fn agent_overrides() {
        let s = overrides(&[
            ("ENABLE_REAL_AI", "true"),
            ("DEFAULT_AI_AGENT", "copilot"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("OPENAI_API_KEY", "sk-abc"),
        ]);
        assert!(s.agents.enable_real_ai);
        assert_eq!(s.agents.default_agent, "copilot");
        assert_eq!(s.agents.openai.model, "gpt-4o-mini");
        let key = s.agents.openai.api_key.unwrap();
        assert_eq!(key.0.expose_secret(), "sk-abc");
    }

    #[test]
    fn empty_values_are_skipped() {
        let s = overrides(&[("OPENAI_API_KEY", "")]);
        assert!(s.agents.openai.api_key.is_none());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_u64_range("42", 1, 100), Some(42));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_f64_range("0.2", 0.0, 2.0), Some(0.2));
        assert_eq!(parse_f64_range("NaN", 0.0, 2.0), None);
        assert_eq!(parse_backend("SQLite"), Some(UsageBackend::Sqlite));
    }
}
