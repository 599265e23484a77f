//! Security audit trail. Each event is a JSON line in
//! `<dir>/security_YYYYMMDD.log` and is mirrored as a WARN log.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    RateLimitExceeded,
    SuspiciousInput,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub ip_address: String,
    pub details: String,
}

impl SecurityEvent {
    pub fn rate_limit_exceeded(client_id: &str, limit: usize, window_secs: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: SecurityEventType::RateLimitExceeded,
            ip_address: client_id.to_string(),
            details: format!("Limit: {limit} requests per {window_secs}s"),
        }
    }

    pub fn suspicious_input(source: &str, pattern: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: SecurityEventType::SuspiciousInput,
            ip_address: source.to_string(),
            details: format!("Suspicious pattern detected: {pattern}"),
        }
    }
}

/// Destination for security events. Recording must never fail the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &SecurityEvent);
}

/// Appends events to one file per day.
pub struct JsonlAuditLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("security_{}.log", timestamp.format("%Y%m%d")))
    }

    fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, event: &SecurityEvent) {
        tracing::warn!(
            client_id = %event.ip_address,
            event_type = ?event.event_type,
            details = %event.details,
            "security event"
        );

        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode security event");
                return;
            }
        };
        let path = self.path_for(&event.timestamp);
        let _guard = self.write_lock.lock();
        if let Err(e) = self.append(&path, &line) {
            tracing::error!(path = %path.display(), error = %e, "failed to write security log");
        }
    }
}

/// Keeps events in memory. Used when no audit directory is configured and in tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &SecurityEvent) {
        tracing::warn!(client_id = %event.ip_address, details = %event.details, "security event");
        self.events.lock().push(event.clone());
    }
}
