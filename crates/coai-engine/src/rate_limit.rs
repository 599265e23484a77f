//! Per-client sliding-window admission control with a sticky block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use coai_telemetry::{AuditSink, MetricsRecorder, SecurityEvent};

/// Idle clients are swept once every this many admission checks.
const SWEEP_INTERVAL: u64 = 1024;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub limit: usize,
    pub window: Duration,
    pub block: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(3600),
            block: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// `newly_blocked` is true only on the request that tripped the limit.
    Rejected { newly_blocked: bool },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Default)]
struct ClientWindow {
    hits: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl ClientWindow {
    /// Drop hits strictly older than `now - window`. A hit exactly on the
    /// boundary still counts.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) > window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_blocked(&mut self, now: Instant) -> bool {
        match self.blocked_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.blocked_until = None;
                false
            }
            None => false,
        }
    }
}

pub struct RateLimiter {
    clients: DashMap<String, Arc<Mutex<ClientWindow>>>,
    config: RateLimitConfig,
    audit: Arc<dyn AuditSink>,
    metrics: Option<Arc<MetricsRecorder>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            clients: DashMap::new(),
            config,
            audit,
            metrics: None,
            checks: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check `client_id` against the configured limit and window.
    pub fn admit(&self, client_id: &str) -> Admission {
        self.admit_with(client_id, self.config.limit, self.config.window, Instant::now())
    }

    pub fn admit_at(&self, client_id: &str, now: Instant) -> Admission {
        self.admit_with(client_id, self.config.limit, self.config.window, now)
    }

    pub fn admit_with(
        &self,
        client_id: &str,
        limit: usize,
        window: Duration,
        now: Instant,
    ) -> Admission {
        let state = self
            .clients
            .entry(client_id.to_string())
            .or_default()
            .value()
            .clone();

        let admission = {
            let mut w = state.lock();
            if w.is_blocked(now) {
                Admission::Rejected {
                    newly_blocked: false,
                }
            } else {
                w.prune(now, window);
                if w.hits.len() >= limit {
                    w.blocked_until = Some(now + self.config.block);
                    Admission::Rejected {
                        newly_blocked: true,
                    }
                } else {
                    w.hits.push_back(now);
                    Admission::Allowed
                }
            }
        };
        drop(state);

        match admission {
            Admission::Allowed => self.count("ratelimit.admitted", &[]),
            Admission::Rejected { newly_blocked } => {
                if newly_blocked {
                    warn!(
                        client_id,
                        limit,
                        block_secs = self.config.block.as_secs(),
                        "rate limit exceeded, client blocked"
                    );
                    self.audit.record(&SecurityEvent::rate_limit_exceeded(
                        client_id,
                        limit,
                        window.as_secs(),
                    ));
                }
                let reason = if newly_blocked { "limit" } else { "blocked" };
                self.count("ratelimit.rejected", &[("reason", reason)]);
            }
        }

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep(now, window);
        }
        admission
    }

    /// Remove clients with no hits inside the window and no active block.
    /// States currently held by an in-flight check are kept.
    pub fn sweep(&self, now: Instant, window: Duration) {
        self.clients.retain(|_, state| {
            if Arc::strong_count(state) > 1 {
                return true;
            }
            let mut w = state.lock();
            w.prune(now, window);
            !(w.hits.is_empty() && !w.is_blocked(now))
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    fn count(&self, name: &str, labels: &[(&str, &str)]) {
        if let Some(m) = &self.metrics {
            m.counter_inc(name, labels, 1);
        }
    }
}
