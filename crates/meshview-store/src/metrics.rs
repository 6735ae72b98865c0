//! Cache counters.
//!
//! Caches take an injected [`CacheMetrics`] sink instead of registering
//! process-wide counters, so each cache can be tested on its own. Exporting the
//! numbers (Prometheus or otherwise) is left to whoever owns the sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Sink for cache observability counters, keyed by cache name.
pub trait CacheMetrics: Send + Sync {
    /// A lookup was made against the cache.
    fn record_request(&self, cache: &str);

    /// A lookup found its key.
    fn record_hit(&self, cache: &str);

    /// A lookup did not find its key.
    fn record_miss(&self, cache: &str);

    /// An entry was evicted.
    fn record_eviction(&self, cache: &str);
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    fn record_request(&self, _cache: &str) {}

    fn record_hit(&self, _cache: &str) {}

    fn record_miss(&self, _cache: &str) {}

    fn record_eviction(&self, _cache: &str) {}
}

#[derive(Debug, Default)]
struct CounterSet {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time values of one cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Total lookups.
    pub requests: u64,

    /// Lookups that found their key.
    pub hits: u64,

    /// Lookups that missed.
    pub misses: u64,

    /// Entries evicted.
    pub evictions: u64,
}

/// In-memory [`CacheMetrics`] implementation with one counter set per cache name.
#[derive(Debug, Default)]
pub struct CacheCounters {
    counters: RwLock<HashMap<String, Arc<CounterSet>>>,
}

impl CacheCounters {
    /// Create an empty counter registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters_for(&self, cache: &str) -> Arc<CounterSet> {
        if let Some(set) = self.counters.read().get(cache) {
            return Arc::clone(set);
        }
        let mut counters = self.counters.write();
        Arc::clone(counters.entry(cache.to_string()).or_default())
    }

    /// Current counter values for `cache` (all zero if never touched).
    pub fn snapshot(&self, cache: &str) -> CounterSnapshot {
        match self.counters.read().get(cache) {
            Some(set) => CounterSnapshot {
                requests: set.requests.load(Ordering::Relaxed),
                hits: set.hits.load(Ordering::Relaxed),
                misses: set.misses.load(Ordering::Relaxed),
                evictions: set.evictions.load(Ordering::Relaxed),
            },
            None => CounterSnapshot::default(),
        }
    }

    /// Names of all caches that have recorded at least one event.
    pub fn caches(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counters.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl CacheMetrics for CacheCounters {
    fn record_request(&self, cache: &str) {
        self.counters_for(cache)
            .requests
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_hit(&self, cache: &str) {
        self.counters_for(cache).hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, cache: &str) {
        self.counters_for(cache).misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self, cache: &str) {
        self.counters_for(cache)
            .evictions
            .fetch_add(1, Ordering::Relaxed);
    }
}
