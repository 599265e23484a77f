use std::path::PathBuf;

/// Failures from either snapshot backend. Sources are kept so callers can
/// log the underlying cause chain.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("snapshot payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },
}
