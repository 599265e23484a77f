//! Durable sinks for daily usage snapshots.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use coai_core::DailySnapshot;
use rusqlite::OptionalExtension;

use crate::database::Database;
use crate::error::StoreError;

/// Persistence sink for one snapshot per calendar day.
///
/// `write` replaces the whole day atomically; `read` returns `None` for a
/// day that was never written.
pub trait SnapshotStore: Send + Sync {
    fn write(&self, date: NaiveDate, snapshot: &DailySnapshot) -> Result<(), StoreError>;
    fn read(&self, date: NaiveDate) -> Result<Option<DailySnapshot>, StoreError>;
}

/// `<root>/daily/<YYYY-MM-DD>.json`, written via temp file + rename.
pub struct JsonFileStore {
    daily_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            daily_dir: root.as_ref().join("daily"),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }
}

impl SnapshotStore for JsonFileStore {
    fn write(&self, date: NaiveDate, snapshot: &DailySnapshot) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.daily_dir)?;
        let path = self.path_for(date);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(&self, date: NaiveDate) -> Result<Option<DailySnapshot>, StoreError> {
        let path = self.path_for(date);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// One row per day in `usage_daily`.
pub struct SqliteSnapshotStore {
    db: Database,
}

impl SqliteSnapshotStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn write(&self, date: NaiveDate, snapshot: &DailySnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        let key = date.format("%Y-%m-%d").to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO usage_daily (date, payload, total_requests, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(date) DO UPDATE SET
                     payload = excluded.payload,
                     total_requests = excluded.total_requests,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    key,
                    payload,
                    snapshot.entries.len() as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn read(&self, date: NaiveDate) -> Result<Option<DailySnapshot>, StoreError> {
        let key = date.format("%Y-%m-%d").to_string();
        let payload: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload FROM usage_daily WHERE date = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use coai_core::{RequestId, UsageEntry, UsageStatus};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 2).unwrap()
    }

    fn snapshot(n: usize) -> DailySnapshot {
        let entries = (0..n)
            .map(|i| UsageEntry {
                timestamp: Utc.with_ymd_and_hms(2025, 5, 2, 9, i as u32, 0).unwrap(),
                request_id: RequestId::from_raw(format!("req_{i}")),
                agent_type: "copilot".into(),
                provider: "local".into(),
                project: "demo".into(),
                file: "app.py".into(),
                message_length: 12,
                response_length: 80,
                tokens_used: 0,
                prompt_tokens: 0,
                completion_tokens: 0,
                model: None,
                cost_estimate: 0.0,
                response_time_ms: 4,
                status: UsageStatus::Success,
                real_ai: false,
                error: None,
            })
            .collect();
        DailySnapshot::from_entries(day(), entries)
    }

    fn exercise(store: &dyn SnapshotStore) {
        assert!(store.read(day()).unwrap().is_none());

        store.write(day(), &snapshot(1)).unwrap();
        store.write(day(), &snapshot(3)).unwrap();

        let loaded = store.read(day()).unwrap().unwrap();
        assert_eq!(loaded, snapshot(3));
        assert_eq!(loaded.summary.total_requests, 3);
    }

    #[test]
    fn json_store_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        exercise(&store);
        assert!(dir.path().join("daily").join("2025-05-02.json").exists());
        assert!(!dir.path().join("daily").join("2025-05-02.json.tmp").exists());
    }

    #[test]
    fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("daily")).unwrap();
        std::fs::write(store.path_for(day()), "{ truncated").unwrap();
        assert!(matches!(store.read(day()), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn sqlite_store_roundtrip_and_overwrite() {
        let store = SqliteSnapshotStore::new(Database::in_memory().unwrap());
        exercise(&store);
    }
}
