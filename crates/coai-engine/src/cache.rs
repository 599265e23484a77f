//! TTL-bounded response cache for idempotent reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use coai_telemetry::MetricsRecorder;

/// SHA-256 over a canonical, key-sorted encoding of the request fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Field order does not matter; duplicate names keep the last value.
    pub fn from_parts<'a>(parts: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let canonical: BTreeMap<&str, &str> = parts.into_iter().collect();
        let mut hasher = Sha256::new();
        for (name, value) in &canonical {
            // Length-prefixed so ("ab","c") and ("a","bc") differ.
            hasher.update((name.len() as u64).to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub evict_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
            evict_batch: 100,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
    seq: u64,
}

pub struct ResponseCache<V> {
    entries: Mutex<HashMap<CacheKey, Entry<V>>>,
    config: CacheConfig,
    next_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            next_seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// An entry is valid for reads strictly less than `ttl` after storage.
    /// Expired entries are removed and reported as a miss.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<V> {
        let found = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(e) if now.saturating_duration_since(e.stored_at) < self.config.ttl => {
                    Some(e.value.clone())
                }
                Some(_) => {
                    entries.remove(key);
                    None
                }
                None => None,
            }
        };
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.count("cache.hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.count("cache.miss");
        }
        found
    }

    pub fn put(&self, key: CacheKey, value: V) {
        self.put_at(key, value, Instant::now());
    }

    /// At the ceiling, the oldest `evict_batch` entries go before the insert.
    pub fn put_at(&self, key: CacheKey, value: V, now: Instant) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let mut by_age: Vec<(u64, CacheKey)> = entries
                .iter()
                .map(|(k, e)| (e.seq, k.clone()))
                .collect();
            by_age.sort_unstable_by_key(|(seq, _)| *seq);
            let batch = self.config.evict_batch.max(1);
            let evicted = by_age
                .into_iter()
                .take(batch)
                .filter(|(_, old)| entries.remove(old).is_some())
                .count() as u64;
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            if let Some(m) = &self.metrics {
                m.counter_inc("cache.evicted", &[], evicted);
            }
            debug!(evicted, remaining = entries.len(), "cache eviction");
        }
        entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
                seq,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn count(&self, name: &str) {
        if let Some(m) = &self.metrics {
            m.counter_inc(name, &[], 1);
        }
    }
}
