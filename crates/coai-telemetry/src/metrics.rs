//! In-process counters and latency histograms, surfaced on `/status`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Observations kept per histogram; older ones are dropped.
const HISTOGRAM_WINDOW: usize = 4096;

/// Metric name plus its labels, sorted so label order never splits a series.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        labels.sort_unstable();
        Self {
            name: name.to_owned(),
            labels,
        }
    }

    fn labels(&self) -> HashMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

#[derive(Default)]
struct Window {
    recent: Mutex<VecDeque<f64>>,
    seen: AtomicU64,
}

impl Window {
    fn push(&self, value: f64) {
        let mut recent = self.recent.lock();
        if recent.len() == HISTOGRAM_WINDOW {
            recent.pop_front();
        }
        recent.push_back(value);
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    fn summarize(&self) -> HistogramSummary {
        let mut sorted: Vec<f64> = self.recent.lock().iter().copied().collect();
        if sorted.is_empty() {
            return HistogramSummary::default();
        }
        sorted.sort_by(f64::total_cmp);
        let rank = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)];
        HistogramSummary {
            count: self.seen.load(Ordering::Relaxed),
            sum: sorted.iter().sum(),
            p50: rank(0.50),
            p95: rank(0.95),
            p99: rank(0.99),
        }
    }
}

/// `count` covers every observation; `sum` and the percentiles only the
/// retained window.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterValue {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistogramValue {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub summary: HistogramSummary,
}

/// Point-in-time view of every series, sorted by name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsReport {
    pub counters: Vec<CounterValue>,
    pub histograms: Vec<HistogramValue>,
}

/// Shared by the rate limiter, cache, router, orchestrator and usage
/// tracker. Nothing is exported off-process.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: DashMap<SeriesKey, AtomicU64>,
    histograms: DashMap<SeriesKey, Window>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        self.counters
            .entry(SeriesKey::new(name, labels))
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.histograms
            .entry(SeriesKey::new(name, labels))
            .or_default()
            .push(value);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&SeriesKey::new(name, labels))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.histograms
            .get(&SeriesKey::new(name, labels))
            .map(|w| w.summarize())
            .unwrap_or_default()
    }

    pub fn report(&self) -> MetricsReport {
        let mut counters: Vec<CounterValue> = self
            .counters
            .iter()
            .map(|entry| CounterValue {
                name: entry.key().name.clone(),
                labels: entry.key().labels(),
                value: entry.value().load(Ordering::Relaxed),
            })
            .collect();
        counters.sort_by(|a, b| a.name.cmp(&b.name));

        let mut histograms: Vec<HistogramValue> = self
            .histograms
            .iter()
            .map(|entry| HistogramValue {
                name: entry.key().name.clone(),
                labels: entry.key().labels(),
                summary: entry.value().summarize(),
            })
            .collect();
        histograms.sort_by(|a, b| a.name.cmp(&b.name));

        MetricsReport {
            counters,
            histograms,
        }
    }
}
