mod audit;
mod logging;
mod metrics;

pub use audit::{AuditSink, JsonlAuditLog, MemoryAuditSink, SecurityEvent, SecurityEventType};
pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};
pub use metrics::{CounterValue, HistogramSummary, HistogramValue, MetricsRecorder, MetricsReport};

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging setup for the server process.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Base level. `RUST_LOG` replaces the whole filter when set.
    pub log_level: Level,
    /// Extra `target=level` directives, e.g. `("coai_llm", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl TelemetryConfig {
    /// Unknown names fall back to INFO.
    pub fn parse_level(name: &str) -> Level {
        Level::from_str(name.trim()).unwrap_or(Level::INFO)
    }

    fn filter_directives(&self) -> String {
        std::iter::once(self.log_level.as_str().to_lowercase())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(target, level)| format!("{target}={}", level.as_str().to_lowercase())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.filter_directives()))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: false,
            log_db_path: PathBuf::from("coai-logs.db"),
        }
    }
}

/// Hold for the life of the process.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
    metrics: Arc<MetricsRecorder>,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    /// Persisted WARN+ records, when SQLite logging is on.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

fn open_log_sink(config: &TelemetryConfig) -> Option<Arc<SqliteLogSink>> {
    if !config.log_to_sqlite {
        return None;
    }
    // The subscriber is not installed yet, so this cannot go through tracing.
    SqliteLogSink::new(&config.log_db_path)
        .map(Arc::new)
        .map_err(|e| eprintln!("coai-telemetry: cannot open {}: {e}", config.log_db_path.display()))
        .ok()
}

/// Installs JSON stdout logging plus the optional SQLite layer. A second
/// call leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let log_sink = open_log_sink(&config);

    let stdout = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_filter(config.env_filter());

    let installed = tracing_subscriber::registry()
        .with(stdout)
        .with(log_sink.clone().map(SqliteLogLayer::new))
        .try_init();
    if let Err(e) = installed {
        eprintln!("coai-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        log_sink,
        metrics: Arc::new(MetricsRecorder::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_names() {
        assert_eq!(TelemetryConfig::parse_level("debug"), Level::DEBUG);
        assert_eq!(TelemetryConfig::parse_level("WARN"), Level::WARN);
        assert_eq!(TelemetryConfig::parse_level("chatty"), Level::INFO);
    }

    #[test]
    fn module_levels_become_directives() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("coai_llm".into(), Level::DEBUG)],
            ..TelemetryConfig::default()
        };
        assert_eq!(config.filter_directives(), "warn,coai_llm=debug");
    }

    #[test]
    fn sqlite_sink_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TelemetryConfig {
            log_db_path: dir.path().join("logs").join("coai.db"),
            ..TelemetryConfig::default()
        };
        assert!(open_log_sink(&config).is_none());
        config.log_to_sqlite = true;
        assert!(open_log_sink(&config).is_some());
        assert!(config.log_db_path.exists());
    }

    #[test]
    fn default_config_keeps_logs_on_stdout_only() {
        let config = TelemetryConfig::default();
        assert!(!config.log_to_sqlite);
        assert_eq!(config.log_level, Level::INFO);
    }
}
