use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub request_id: Option<String>,
    pub client_id: Option<String>,
    pub agent: Option<String>,
}

/// Filters for [`SqliteLogSink::query`]. Results are newest first.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub request_id: Option<String>,
    pub client_id: Option<String>,
    pub agent: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Persists WARN and ERROR events so failed requests can be traced by
/// request, client or agent after the fact.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 request_id TEXT,
                 client_id TEXT,
                 agent TEXT,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_request ON logs(request_id);
             CREATE INDEX IF NOT EXISTS idx_logs_client ON logs(client_id);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, request_id, client_id, agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.request_id,
                record.client_id,
                record.agent,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let filters = [
            ("level = ", &q.level),
            ("request_id = ", &q.request_id),
            ("client_id = ", &q.client_id),
            ("agent = ", &q.agent),
            ("timestamp >= ", &q.since),
        ];
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, request_id, client_id, agent \
             FROM logs WHERE 1=1",
        );
        let mut values: Vec<&str> = Vec::new();
        for (clause, value) in filters {
            if let Some(v) = value {
                values.push(v);
                sql.push_str(&format!(" AND {clause}?{}", values.len()));
            }
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                request_id: row.get(6)?,
                client_id: row.get(7)?,
                agent: row.get(8)?,
            })
        })?;

        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    request_id: Option<String>,
    client_id: Option<String>,
    agent: Option<String>,
}

/// `tracing` layer feeding [`SqliteLogSink`]. Ids missing on the event are
/// taken from the nearest enclosing span that carries them.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    ids: SpanFields,
}

impl FieldVisitor {
    fn put_text(&mut self, name: &str, value: String) {
        let slot = match name {
            "message" => &mut self.message,
            "request_id" => &mut self.ids.request_id,
            "client_id" => &mut self.ids.client_id,
            "agent" => &mut self.ids.agent,
            _ => {
                self.put_value(name, value.into());
                return;
            }
        };
        *slot = Some(value);
    }

    fn put_value(&mut self, name: &str, value: serde_json::Value) {
        self.fields.insert(name.to_owned(), value);
    }

    fn fields_json(&self) -> Option<String> {
        (!self.fields.is_empty())
            .then(|| serde_json::to_string(&self.fields).ok())
            .flatten()
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put_text(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put_text(field.name(), value.to_owned());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put_value(field.name(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put_value(field.name(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put_value(field.name(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put_value(field.name(), value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        if !visitor.ids.is_complete() {
            for span in ctx.event_scope(event).into_iter().flatten() {
                if let Some(inherited) = span.extensions().get::<SpanFields>() {
                    visitor.ids.fill_from(inherited);
                }
            }
        }

        let fields = visitor.fields_json();
        let FieldVisitor { message, ids, .. } = visitor;
        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: meta.level().as_str().to_owned(),
            target: meta.target().to_owned(),
            message: message.unwrap_or_default(),
            fields,
            request_id: ids.request_id,
            client_id: ids.client_id,
            agent: ids.agent,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if !visitor.ids.is_empty() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(visitor.ids);
            }
        }
    }
}

/// Correlation ids, kept on spans for their child events.
#[derive(Default)]
struct SpanFields {
    request_id: Option<String>,
    client_id: Option<String>,
    agent: Option<String>,
}

impl SpanFields {
    fn is_empty(&self) -> bool {
        self.request_id.is_none() && self.client_id.is_none() && self.agent.is_none()
    }

    fn is_complete(&self) -> bool {
        self.request_id.is_some() && self.client_id.is_some() && self.agent.is_some()
    }

    fn fill_from(&mut self, other: &SpanFields) {
        for (mine, theirs) in [
            (&mut self.request_id, &other.request_id),
            (&mut self.client_id, &other.client_id),
            (&mut self.agent, &other.agent),
        ] {
            if mine.is_none() {
                mine.clone_from(theirs);
            }
        }
    }
}
