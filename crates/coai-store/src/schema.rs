//! Usage database layout. Each migration runs once, tracked by
//! `PRAGMA user_version`.

pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

/// Applied in order; entry `n` moves the database to version `n + 1`.
pub const MIGRATIONS: &[&str] = &["
CREATE TABLE IF NOT EXISTS usage_daily (
    date TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    total_requests INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"];

pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}
