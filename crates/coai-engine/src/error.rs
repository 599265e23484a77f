use std::path::PathBuf;

use coai_core::CoaiError;
use coai_store::StoreError;

/// Failure to load or parse a rules layer.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("cannot read rules file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot list projects under {path}: {source}")]
    ProjectsRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Source(String),
}

impl From<RuleError> for CoaiError {
    fn from(e: RuleError) -> Self {
        CoaiError::Configuration(e.to_string())
    }
}

/// Startup and wiring errors for engine components.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("agent '{0}' already registered")]
    DuplicateAgent(String),

    #[error("rules error: {0}")]
    Rules(#[from] RuleError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
