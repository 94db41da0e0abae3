//! # Cache Statistics
//!
//! Process-lifetime counters for the report cache. Every counter is an atomic and every
//! increment is mirrored to the `metrics` facade so Prometheus sees the same numbers.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const METRIC_HITS: &str = "report_cache_hits_total";
pub const METRIC_MISSES: &str = "report_cache_misses_total";
pub const METRIC_BACKEND_BYPASSES: &str = "report_cache_backend_bypasses_total";
pub const METRIC_STORE_FAILURES: &str = "report_cache_store_failures_total";
pub const METRIC_INVALIDATED_KEYS: &str = "report_cache_invalidated_keys_total";
pub const METRIC_INVALIDATION_FAILURES: &str = "report_cache_invalidation_failures_total";
pub const METRIC_DROPPED_EVENTS: &str = "report_cache_dropped_events_total";
pub const METRIC_PRODUCER_DURATION: &str = "report_cache_producer_duration_seconds";

/// Point-in-time view of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup
    pub hit_rate: f64,
    /// Store calls that failed or timed out and were passed through
    pub backend_bypasses: u64,
    /// Best-effort writes that did not land
    pub store_failures: u64,
    pub invalidated_keys: u64,
    pub invalidation_failures: u64,
    pub dropped_events: u64,
    pub started_at: DateTime<Utc>,
}

/// Atomic hit/miss and health counters
#[derive(Debug)]
pub struct StatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    backend_bypasses: AtomicU64,
    store_failures: AtomicU64,
    invalidated_keys: AtomicU64,
    invalidation_failures: AtomicU64,
    dropped_events: AtomicU64,
    started_at: DateTime<Utc>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backend_bypasses: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            invalidated_keys: AtomicU64::new(0),
            invalidation_failures: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_HITS).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_MISSES).increment(1);
    }

    pub fn record_backend_bypass(&self, operation: &'static str) {
        self.backend_bypasses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_BACKEND_BYPASSES, "operation" => operation).increment(1);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_STORE_FAILURES).increment(1);
    }

    pub fn record_invalidated(&self, keys: u64) {
        if keys == 0 {
            return;
        }
        self.invalidated_keys.fetch_add(keys, Ordering::Relaxed);
        counter!(METRIC_INVALIDATED_KEYS).increment(keys);
    }

    pub fn record_invalidation_failure(&self) {
        self.invalidation_failures.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_INVALIDATION_FAILURES).increment(1);
    }

    pub fn record_dropped_event(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_DROPPED_EVENTS).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        StatsSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            backend_bypasses: self.backend_bypasses.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            invalidated_keys: self.invalidated_keys.load(Ordering::Relaxed),
            invalidation_failures: self.invalidation_failures.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
