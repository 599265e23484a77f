//! Per-request accounting with a write-through daily ledger.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use coai_core::{summarize, CoaiError, DailySnapshot, DailySummary, UsageEntry};
use coai_store::SnapshotStore;
use coai_telemetry::MetricsRecorder;

pub const MAX_STATS_DAYS: u32 = 365;
const TOP_PROJECTS: usize = 5;

const CSV_HEADER: &[&str] = &[
    "timestamp",
    "request_id",
    "agent_type",
    "provider",
    "project",
    "file",
    "message_length",
    "response_length",
    "tokens_used",
    "prompt_tokens",
    "completion_tokens",
    "model",
    "cost_estimate",
    "response_time_ms",
    "status",
    "real_ai",
    "error",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = CoaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(CoaiError::invalid_field(
                "format",
                format!("unsupported export format '{other}' (expected json or csv)"),
            )),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub requests: u64,
    pub tokens: u64,
    pub cost: f64,
    pub real_ai_requests: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UsageAverages {
    pub requests_per_day: f64,
    pub tokens_per_day: f64,
    pub cost_per_day: f64,
    pub response_time_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectActivity {
    pub project: String,
    pub requests: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UsageTrends {
    pub most_active_projects: Vec<ProjectActivity>,
    pub agent_usage: BTreeMap<String, u64>,
}

/// Aggregate over the last `period_days` days, today included.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UsageStats {
    pub period_days: u32,
    /// Days with traffic only, newest first.
    pub daily_summaries: Vec<DailySummary>,
    pub totals: UsageTotals,
    /// Averaged over days with traffic.
    pub averages: UsageAverages,
    pub trends: UsageTrends,
}

/// The open day plus any earlier day whose last write failed. Days only
/// leave `unpersisted` once a write succeeds.
struct Ledger {
    current: DailySnapshot,
    current_dirty: bool,
    unpersisted: BTreeMap<NaiveDate, DailySnapshot>,
}

impl Ledger {
    fn open(store: &dyn SnapshotStore, date: NaiveDate) -> Self {
        Self {
            current: load_day(store, date),
            current_dirty: false,
            unpersisted: BTreeMap::new(),
        }
    }

    /// In-memory copy if one is held back, else the stored day.
    fn take_day(&mut self, store: &dyn SnapshotStore, date: NaiveDate) -> DailySnapshot {
        self.unpersisted
            .remove(&date)
            .unwrap_or_else(|| load_day(store, date))
    }

    fn held(&self, date: NaiveDate) -> Option<&DailySnapshot> {
        if self.current.date == date {
            return Some(&self.current);
        }
        self.unpersisted.get(&date)
    }
}

pub struct UsageTracker {
    store: Arc<dyn SnapshotStore>,
    ledger: Mutex<Ledger>,
    export_dir: PathBuf,
    accounting_failures: AtomicU64,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl UsageTracker {
    /// Replays today's snapshot from `store`.
    pub fn new(store: Arc<dyn SnapshotStore>, export_dir: impl Into<PathBuf>) -> Self {
        Self::starting_on(store, export_dir, Utc::now().date_naive())
    }

    pub fn starting_on(
        store: Arc<dyn SnapshotStore>,
        export_dir: impl Into<PathBuf>,
        date: NaiveDate,
    ) -> Self {
        let ledger = Ledger::open(store.as_ref(), date);
        if !ledger.current.entries.is_empty() {
            info!(date = %date, entries = ledger.current.entries.len(), "usage ledger replayed");
        }
        Self {
            store,
            ledger: Mutex::new(ledger),
            export_dir: export_dir.into(),
            accounting_failures: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Append and flush. A failed flush is logged and counted; the entry
    /// stays in memory and the day is written again on the next successful
    /// flush. Entries dated after the open day roll the ledger over; late
    /// entries for an earlier day are added to that day without moving it.
    pub fn record(&self, entry: UsageEntry) {
        let date = entry.date();
        let store = self.store.as_ref();
        let mut ledger = self.ledger.lock();

        if date > ledger.current.date {
            info!(from = %ledger.current.date, to = %date, "usage ledger rolled over");
            let incoming = ledger.take_day(store, date);
            let outgoing = std::mem::replace(&mut ledger.current, incoming);
            if std::mem::take(&mut ledger.current_dirty) {
                ledger.unpersisted.insert(outgoing.date, outgoing);
            }
        }

        if date == ledger.current.date {
            append(&mut ledger.current, entry);
            let written = self.persist(&ledger.current);
            ledger.current_dirty = !written;
        } else {
            let mut late = ledger.take_day(store, date);
            append(&mut late, entry);
            if !self.persist(&late) {
                ledger.unpersisted.insert(date, late);
            }
        }

        if !ledger.current_dirty && !ledger.unpersisted.is_empty() {
            let pending = std::mem::take(&mut ledger.unpersisted);
            for (day, snapshot) in pending {
                if self.persist(&snapshot) {
                    info!(date = %day, "held-back usage snapshot persisted");
                } else {
                    ledger.unpersisted.insert(day, snapshot);
                }
            }
        }
    }

    fn persist(&self, snapshot: &DailySnapshot) -> bool {
        let Err(e) = self.store.write(snapshot.date, snapshot) else {
            return true;
        };
        let err = CoaiError::Accounting(e.to_string());
        warn!(error = %err, date = %snapshot.date, "usage snapshot not persisted");
        self.accounting_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.counter_inc("usage.persist_failed", &[], 1);
        }
        false
    }

    /// Days held in memory because their last write failed.
    pub fn unpersisted_days(&self) -> Vec<NaiveDate> {
        let ledger = self.ledger.lock();
        let mut days: Vec<NaiveDate> = ledger.unpersisted.keys().copied().collect();
        if ledger.current_dirty {
            days.push(ledger.current.date);
        }
        days
    }

    pub fn accounting_failures(&self) -> u64 {
        self.accounting_failures.load(Ordering::Relaxed)
    }

    /// Date of the in-memory ledger.
    pub fn ledger_date(&self) -> NaiveDate {
        self.ledger.lock().current.date
    }

    /// `None` means today. The ledger day is served from memory; other days
    /// are refolded from their own snapshot.
    pub fn daily_summary(&self, date: Option<NaiveDate>) -> Result<DailySummary, CoaiError> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        Ok(self.snapshot(date)?.summary)
    }

    pub fn stats(&self, days: u32) -> Result<UsageStats, CoaiError> {
        self.stats_until(Utc::now().date_naive(), days)
    }

    pub fn stats_until(&self, today: NaiveDate, days: u32) -> Result<UsageStats, CoaiError> {
        if days == 0 || days > MAX_STATS_DAYS {
            return Err(CoaiError::invalid_field(
                "days",
                format!("days must be between 1 and {MAX_STATS_DAYS}"),
            ));
        }

        let mut totals = UsageTotals::default();
        let mut summaries = Vec::new();
        let mut latency_sum = 0.0;
        let mut projects: HashMap<String, u64> = HashMap::new();
        let mut agents: BTreeMap<String, u64> = BTreeMap::new();

        for offset in 0..days {
            let Some(date) = today.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            let day = self.snapshot(date)?;
            if day.summary.total_requests == 0 {
                continue;
            }
            totals.requests += day.summary.total_requests;
            totals.tokens += day.summary.total_tokens;
            totals.cost += day.summary.total_cost;
            totals.real_ai_requests += day.summary.real_ai_requests;
            latency_sum += day.summary.avg_response_time_ms;
            for e in &day.entries {
                *projects.entry(e.project.clone()).or_default() += 1;
                *agents.entry(e.agent_type.clone()).or_default() += 1;
            }
            summaries.push(day.summary);
        }

        let active = summaries.len() as f64;
        let averages = if summaries.is_empty() {
            UsageAverages::default()
        } else {
            UsageAverages {
                requests_per_day: totals.requests as f64 / active,
                tokens_per_day: totals.tokens as f64 / active,
                cost_per_day: totals.cost / active,
                response_time_ms: latency_sum / active,
            }
        };

        let mut ranked: Vec<ProjectActivity> = projects
            .into_iter()
            .map(|(project, requests)| ProjectActivity { project, requests })
            .collect();
        ranked.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.project.cmp(&b.project)));
        ranked.truncate(TOP_PROJECTS);

        totals.cost = coai_core::usage::round_to(totals.cost, 6);
        Ok(UsageStats {
            period_days: days,
            daily_summaries: summaries,
            totals,
            averages,
            trends: UsageTrends {
                most_active_projects: ranked,
                agent_usage: agents,
            },
        })
    }

    /// Write every stored day in `[start, end]` to
    /// `usage_export_<start>_to_<end>.<ext>` and return its path.
    pub fn export(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        format: ExportFormat,
    ) -> Result<PathBuf, CoaiError> {
        if start > end {
            return Err(CoaiError::validation(format!(
                "start date {start} is after end date {end}"
            )));
        }
        if (end - start).num_days() >= i64::from(MAX_STATS_DAYS) {
            return Err(CoaiError::validation(format!(
                "export range is limited to {MAX_STATS_DAYS} days"
            )));
        }

        let mut days = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            let day = self.snapshot(date)?;
            if !day.entries.is_empty() {
                days.push(day);
            }
        }

        let path = self.export_dir.join(format!(
            "usage_export_{start}_to_{end}.{}",
            format.extension()
        ));
        let body = match format {
            ExportFormat::Json => {
                let doc = serde_json::json!({
                    "export_info": {
                        "start_date": start,
                        "end_date": end,
                        "export_timestamp": Utc::now().to_rfc3339(),
                        "format": format,
                    },
                    "daily_data": days,
                });
                serde_json::to_string_pretty(&doc)
                    .map_err(|e| CoaiError::Accounting(format!("export encode: {e}")))?
            }
            ExportFormat::Csv => render_csv(days.iter().flat_map(|d| d.entries.iter())),
        };
        write_export(&path, &body)?;
        info!(path = %path.display(), days = days.len(), "usage exported");
        Ok(path)
    }

    /// Entries and summary for `date`. Days held in memory win over the
    /// store.
    pub fn snapshot(&self, date: NaiveDate) -> Result<DailySnapshot, CoaiError> {
        if let Some(held) = self.ledger.lock().held(date) {
            return Ok(held.clone());
        }
        match self.store.read(date) {
            Ok(Some(stored)) => Ok(DailySnapshot::from_entries(date, stored.entries)),
            Ok(None) => Ok(DailySnapshot::empty(date)),
            Err(e) => Err(CoaiError::Accounting(e.to_string())),
        }
    }
}

fn append(day: &mut DailySnapshot, entry: UsageEntry) {
    day.entries.push(entry);
    day.summary = summarize(day.date, &day.entries);
}

fn load_day(store: &dyn SnapshotStore, date: NaiveDate) -> DailySnapshot {
    match store.read(date) {
        Ok(Some(stored)) => DailySnapshot::from_entries(date, stored.entries),
        Ok(None) => DailySnapshot::empty(date),
        Err(e) => {
            warn!(error = %e, date = %date, "cannot replay usage snapshot, starting empty");
            DailySnapshot::empty(date)
        }
    }
}

fn write_export(path: &Path, body: &str) -> Result<(), CoaiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoaiError::Accounting(format!("export dir: {e}")))?;
    }
    std::fs::write(path, body).map_err(|e| CoaiError::Accounting(format!("export write: {e}")))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_csv<'a>(entries: impl Iterator<Item = &'a UsageEntry>) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for e in entries {
        let row = [
            e.timestamp.to_rfc3339(),
            e.request_id.to_string(),
            e.agent_type.clone(),
            e.provider.clone(),
            e.project.clone(),
            e.file.clone(),
            e.message_length.to_string(),
            e.response_length.to_string(),
            e.tokens_used.to_string(),
            e.prompt_tokens.to_string(),
            e.completion_tokens.to_string(),
            e.model.clone().unwrap_or_default(),
            e.cost_estimate.to_string(),
            e.response_time_ms.to_string(),
            e.status.as_str().to_string(),
            e.real_ai.to_string(),
            e.error.clone().unwrap_or_default(),
        ];
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use coai_core::{RequestId, UsageStatus};
    use coai_store::{JsonFileStore, StoreError};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn entry(d: u32, hour: u32, agent: &str, project: &str, tokens: u32, real: bool) -> UsageEntry {
        UsageEntry {
            timestamp: Utc.with_ymd_and_hms(2025, 6, d, hour, 0, 0).unwrap(),
            request_id: RequestId::new(),
            agent_type: agent.into(),
            provider: "test".into(),
            project: project.into(),
            file: "main.py".into(),
            message_length: 10,
            response_length: 40,
            tokens_used: tokens,
            prompt_tokens: tokens / 2,
            completion_tokens: tokens - tokens / 2,
            model: real.then(|| "gpt-3.5-turbo".to_string()),
            cost_estimate: if real { f64::from(tokens) * 0.000_002 } else { 0.0 },
            response_time_ms: 100,
            status: UsageStatus::Success,
            real_ai: real,
            error: None,
        }
    }

    struct BrokenStore;
    impl SnapshotStore for BrokenStore {
        fn write(&self, _: NaiveDate, _: &DailySnapshot) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only filesystem").into())
        }
        fn read(&self, _: NaiveDate) -> Result<Option<DailySnapshot>, StoreError> {
            Ok(None)
        }
    }

    /// Fails writes while `down` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: parking_lot::Mutex<HashMap<NaiveDate, DailySnapshot>>,
        down: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn stored(&self, date: NaiveDate) -> usize {
            self.inner.lock().get(&date).map_or(0, |s| s.entries.len())
        }
    }

    impl SnapshotStore for FlakyStore {
        fn write(&self, date: NaiveDate, snapshot: &DailySnapshot) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.lock().insert(date, snapshot.clone());
            Ok(())
        }
        fn read(&self, date: NaiveDate) -> Result<Option<DailySnapshot>, StoreError> {
            Ok(self.inner.lock().get(&date).cloned())
        }
    }

    fn tracker(dir: &Path, today: NaiveDate) -> UsageTracker {
        UsageTracker::starting_on(Arc::new(JsonFileStore::new(dir)), dir, today)
    }

    #[test]
    fn record_writes_through_and_replays() {
        let dir = tempfile::tempdir().unwrap();
        {
            let t = tracker(dir.path(), day(2));
            t.record(entry(2, 9, "openai", "alpha", 100, true));
            t.record(entry(2, 10, "copilot", "beta", 0, false));
            assert!(dir.path().join("daily").join("2025-06-02.json").exists());
        }
        let t = tracker(dir.path(), day(2));
        let summary = t.daily_summary(Some(day(2))).unwrap();
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.projects_used, vec!["alpha", "beta"]);
        assert_eq!(summary.real_ai_requests, 1);
    }

    #[test]
    fn summary_refold_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(3));
        for h in 0..5 {
            t.record(entry(3, h, "openai", "alpha", 10 * (h + 1), true));
        }
        let live = t.daily_summary(Some(day(3))).unwrap();

        let store = JsonFileStore::new(dir.path());
        let stored = store.read(day(3)).unwrap().unwrap();
        let refolded = summarize(day(3), &stored.entries);
        assert_eq!(
            serde_json::to_vec(&live).unwrap(),
            serde_json::to_vec(&refolded).unwrap()
        );
    }

    #[test]
    fn rollover_starts_new_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(4));
        t.record(entry(4, 23, "openai", "alpha", 10, true));
        t.record(entry(5, 0, "openai", "alpha", 20, true));
        assert_eq!(t.ledger_date(), day(5));
        assert_eq!(t.daily_summary(Some(day(4))).unwrap().total_requests, 1);
        assert_eq!(t.daily_summary(Some(day(5))).unwrap().total_tokens, 20);
    }

    #[test]
    fn missing_day_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(6));
        let s = t.daily_summary(Some(day(1))).unwrap();
        assert_eq!(s.total_requests, 0);
        assert_eq!(s.most_used_agent, "none");
    }

    #[test]
    fn persistence_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(MetricsRecorder::new());
        let t = UsageTracker::starting_on(Arc::new(BrokenStore), dir.path(), day(7))
            .with_metrics(metrics.clone());
        t.record(entry(7, 12, "openai", "alpha", 10, true));
        assert_eq!(t.accounting_failures(), 1);
        assert_eq!(metrics.counter_get("usage.persist_failed", &[]), 1);
        assert_eq!(t.daily_summary(Some(day(7))).unwrap().total_requests, 1);
    }

    #[test]
    fn rollover_keeps_unpersisted_day_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let t = UsageTracker::starting_on(Arc::new(BrokenStore), dir.path(), day(7));
        t.record(entry(7, 22, "openai", "alpha", 10, true));
        t.record(entry(7, 23, "openai", "alpha", 10, true));
        t.record(entry(8, 0, "openai", "alpha", 10, true));

        assert_eq!(t.ledger_date(), day(8));
        assert_eq!(t.daily_summary(Some(day(7))).unwrap().total_requests, 2);
        assert_eq!(t.daily_summary(Some(day(8))).unwrap().total_requests, 1);
        assert_eq!(t.unpersisted_days(), vec![day(7), day(8)]);
        assert_eq!(t.stats_until(day(8), 2).unwrap().totals.requests, 3);
    }

    #[test]
    fn held_back_days_flush_once_store_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        let t = UsageTracker::starting_on(store.clone(), dir.path(), day(7));

        store.set_down(true);
        t.record(entry(7, 23, "openai", "alpha", 10, true));
        t.record(entry(8, 0, "openai", "alpha", 10, true));
        assert_eq!(store.stored(day(7)), 0);
        assert_eq!(t.accounting_failures(), 2);

        store.set_down(false);
        t.record(entry(8, 1, "openai", "alpha", 10, true));
        assert_eq!(store.stored(day(7)), 1);
        assert_eq!(store.stored(day(8)), 2);
        assert!(t.unpersisted_days().is_empty());
    }

    #[test]
    fn late_entry_does_not_move_the_ledger_back() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(9));
        t.record(entry(9, 23, "openai", "alpha", 10, true));
        t.record(entry(10, 0, "openai", "alpha", 10, true));
        t.record(entry(9, 23, "copilot", "beta", 0, false));

        assert_eq!(t.ledger_date(), day(10));
        assert_eq!(t.daily_summary(Some(day(9))).unwrap().total_requests, 2);
        assert_eq!(t.daily_summary(Some(day(10))).unwrap().total_requests, 1);
        let stored = JsonFileStore::new(dir.path()).read(day(9)).unwrap().unwrap();
        assert_eq!(stored.entries.len(), 2);
    }

    #[test]
    fn stats_over_range() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(8));
        t.record(entry(8, 1, "openai", "alpha", 100, true));
        t.record(entry(8, 2, "openai", "beta", 100, true));
        t.record(entry(9, 1, "copilot", "alpha", 0, false));
        t.record(entry(10, 1, "openai", "gamma", 50, true));

        let stats = t.stats_until(day(10), 7).unwrap();
        assert_eq!(stats.period_days, 7);
        assert_eq!(stats.daily_summaries.len(), 3);
        assert_eq!(stats.daily_summaries[0].date, day(10));
        assert_eq!(stats.totals.requests, 4);
        assert_eq!(stats.totals.tokens, 250);
        assert_eq!(stats.totals.real_ai_requests, 3);
        assert!((stats.averages.requests_per_day - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.trends.most_active_projects[0].project, "alpha");
        assert_eq!(stats.trends.most_active_projects[0].requests, 2);
        assert_eq!(stats.trends.agent_usage["openai"], 3);
        assert_eq!(stats.trends.agent_usage["copilot"], 1);

        let narrow = t.stats_until(day(10), 1).unwrap();
        assert_eq!(narrow.totals.requests, 1);
    }

    #[test]
    fn stats_rejects_bad_range() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(8));
        assert_eq!(t.stats_until(day(8), 0).unwrap_err().code(), "VALIDATION_ERROR");
        assert!(t.stats_until(day(8), MAX_STATS_DAYS + 1).is_err());
    }

    #[test]
    fn top_projects_capped_at_five() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(11));
        for (i, p) in ["a", "b", "c", "d", "e", "f", "g"].iter().enumerate() {
            for h in 0..=i as u32 {
                t.record(entry(11, h, "copilot", p, 0, false));
            }
        }
        let stats = t.stats_until(day(11), 1).unwrap();
        let names: Vec<&str> = stats
            .trends
            .most_active_projects
            .iter()
            .map(|p| p.project.as_str())
            .collect();
        assert_eq!(names, vec!["g", "f", "e", "d", "c"]);
    }

    #[test]
    fn export_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(12));
        t.record(entry(12, 8, "openai", "alpha", 10, true));
        let mut tricky = entry(12, 9, "copilot", "beta", 0, false);
        tricky.error = Some("said \"no\", then left".into());
        t.record(tricky);

        let json_path = t.export(day(11), day(12), ExportFormat::Json).unwrap();
        assert_eq!(
            json_path.file_name().unwrap().to_str().unwrap(),
            "usage_export_2025-06-11_to_2025-06-12.json"
        );
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(doc["export_info"]["format"], "json");
        assert_eq!(doc["daily_data"].as_array().unwrap().len(), 1);
        assert_eq!(doc["daily_data"][0]["entries"].as_array().unwrap().len(), 2);

        let csv_path = t.export(day(12), day(12), ExportFormat::Csv).unwrap();
        let csv = std::fs::read_to_string(csv_path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,request_id,agent_type"));
        assert!(lines[2].ends_with("\"said \"\"no\"\", then left\""));
    }

    #[test]
    fn export_rejects_inverted_range() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(dir.path(), day(12));
        let err = t.export(day(12), day(11), ExportFormat::Json).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn export_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn entry_hours_are_on_their_day() {
        let e = entry(13, 23, "openai", "alpha", 1, true);
        assert_eq!(e.timestamp.hour(), 23);
        assert_eq!(e.date(), day(13));
    }
}
