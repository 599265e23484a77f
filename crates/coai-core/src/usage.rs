use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Success,
    Degraded,
    Failed,
    Cancelled,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// The caller received a reply (primary or fallback).
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Success | Self::Degraded)
    }
}

/// Immutable fact about one completed request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: RequestId,
    pub agent_type: String,
    pub provider: String,
    pub project: String,
    pub file: String,
    pub message_length: usize,
    pub response_length: usize,
    pub tokens_used: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub model: Option<String>,
    pub cost_estimate: f64,
    pub response_time_ms: u64,
    pub status: UsageStatus,
    pub real_ai: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UsageEntry {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub avg_response_time_ms: f64,
    pub projects_used: Vec<String>,
    pub most_used_agent: String,
    pub real_ai_requests: u64,
}

/// Unit of persistence: one calendar day of entries plus the summary derived from them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub summary: DailySummary,
    pub entries: Vec<UsageEntry>,
}

impl DailySnapshot {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            summary: summarize(date, &[]),
            entries: Vec::new(),
        }
    }

    pub fn from_entries(date: NaiveDate, entries: Vec<UsageEntry>) -> Self {
        Self {
            date,
            summary: summarize(date, &entries),
            entries,
        }
    }
}

pub const NO_AGENT: &str = "none";

/// Fold one day's entries into its summary.
///
/// Output depends only on `date` and the entries in order: projects are
/// sorted and agent ties resolve to the lexicographically smallest name.
pub fn summarize(date: NaiveDate, entries: &[UsageEntry]) -> DailySummary {
    let mut successful = 0u64;
    let mut failed = 0u64;
    let mut tokens = 0u64;
    let mut cost = 0.0f64;
    let mut latency = 0u64;
    let mut real = 0u64;
    let mut projects = BTreeSet::new();
    let mut agents: BTreeMap<&str, u64> = BTreeMap::new();

    for e in entries {
        if e.status.is_successful() {
            successful += 1;
        } else {
            failed += 1;
        }
        tokens += u64::from(e.tokens_used);
        cost += e.cost_estimate;
        latency += e.response_time_ms;
        if e.real_ai {
            real += 1;
        }
        projects.insert(e.project.clone());
        *agents.entry(e.agent_type.as_str()).or_default() += 1;
    }

    // BTreeMap iterates names ascending; strict `>` keeps the first (smallest) on ties.
    let mut most_used = NO_AGENT;
    let mut best = 0u64;
    for (&name, &count) in &agents {
        if count > best {
            best = count;
            most_used = name;
        }
    }

    let avg = if entries.is_empty() {
        0.0
    } else {
        latency as f64 / entries.len() as f64
    };

    DailySummary {
        date,
        total_requests: entries.len() as u64,
        successful_requests: successful,
        failed_requests: failed,
        total_tokens: tokens,
        total_cost: round_to(cost, 6),
        avg_response_time_ms: round_to(avg, 3),
        projects_used: projects.into_iter().collect(),
        most_used_agent: most_used.to_string(),
        real_ai_requests: real,
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (value * f).round() / f
}
