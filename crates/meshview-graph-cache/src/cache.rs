//! Per-session graph cache with memory-bounded LRU eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meshview_store::{CacheMetrics, NoopMetrics};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::GraphCacheConfig;
use crate::graph::{GraphOptions, GraphPayload, estimate_graph_memory};
use crate::refresh::GraphGenerator;

/// Name the graph cache reports its counters under.
pub const GRAPH_CACHE_METRICS_NAME: &str = "graph";

/// A session's cached graph and its bookkeeping.
///
/// Everything except the last-accessed time is fixed once the entry is in the
/// cache; a refresh installs a new entry. The last-accessed time sits behind
/// its own lock so reads can touch it without taking the cache's write lock.
#[derive(Debug)]
pub struct CachedGraph<P> {
    /// The graph itself.
    pub payload: P,

    /// Options the graph was generated with.
    pub options: GraphOptions,

    /// When the graph was generated.
    pub generated_at: DateTime<Utc>,

    /// Refresh interval the session asked for.
    pub refresh_interval: Duration,

    /// Estimated size in MB, filled in on insertion if not supplied.
    estimated_mb: Option<f64>,

    /// When a user last read this entry.
    last_accessed: RwLock<DateTime<Utc>>,
}

impl<P: GraphPayload> CachedGraph<P> {
    /// Create an entry generated and accessed now.
    pub fn new(payload: P, options: GraphOptions, refresh_interval: Duration) -> Self {
        let now = Utc::now();
        Self {
            payload,
            options,
            generated_at: now,
            refresh_interval,
            estimated_mb: None,
            last_accessed: RwLock::new(now),
        }
    }

    /// Set the last-accessed time.
    pub fn with_last_accessed(self, last_accessed: DateTime<Utc>) -> Self {
        *self.last_accessed.write() = last_accessed;
        self
    }

    /// Set the generation time.
    pub fn with_generated_at(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = generated_at;
        self
    }

    /// Supply a memory estimate instead of deriving one from the payload.
    pub fn with_estimated_mb(mut self, mb: f64) -> Self {
        self.estimated_mb = Some(mb);
        self
    }

    /// When a user last read this entry.
    pub fn last_accessed(&self) -> DateTime<Utc> {
        *self.last_accessed.read()
    }

    /// How long since a user last read this entry.
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_accessed())
            .to_std()
            .unwrap_or_default()
    }

    /// Estimated size in MB (zero until the entry has been inserted).
    pub fn estimated_mb(&self) -> f64 {
        self.estimated_mb.unwrap_or(0.0)
    }

    fn touch(&self) {
        *self.last_accessed.write() = Utc::now();
    }
}

impl<P: Clone> Clone for CachedGraph<P> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            options: self.options.clone(),
            generated_at: self.generated_at,
            refresh_interval: self.refresh_interval,
            estimated_mb: self.estimated_mb,
            last_accessed: RwLock::new(*self.last_accessed.read()),
        }
    }
}

/// Session graph cache.
///
/// Maps session ids to [`CachedGraph`] entries under an aggregate memory
/// budget. When an insert would push the estimated total over budget, the
/// least recently accessed other sessions are evicted until it fits. The
/// insert itself always succeeds.
///
/// Cloning yields another handle to the same cache.
pub struct SessionGraphCache<P> {
    sessions: Arc<RwLock<HashMap<String, Arc<CachedGraph<P>>>>>,
    generator: Arc<RwLock<Option<Arc<dyn GraphGenerator<P>>>>>,
    config: Arc<GraphCacheConfig>,
    metrics: Arc<dyn CacheMetrics>,
}

impl<P: GraphPayload> SessionGraphCache<P> {
    /// Create a cache with no metrics sink.
    pub fn new(config: GraphCacheConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a cache reporting hits, misses and evictions to `metrics`.
    pub fn with_metrics(config: GraphCacheConfig, metrics: Arc<dyn CacheMetrics>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            generator: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
            metrics,
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &GraphCacheConfig {
        &self.config
    }

    /// Whether graph caching is turned on.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get a session's cached graph, marking it as accessed now.
    pub fn get_session_graph(&self, session_id: &str) -> Option<Arc<CachedGraph<P>>> {
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(cached) => {
                cached.touch();
                self.metrics.record_hit(GRAPH_CACHE_METRICS_NAME);
                Some(Arc::clone(cached))
            }
            None => {
                self.metrics.record_miss(GRAPH_CACHE_METRICS_NAME);
                None
            }
        }
    }

    /// Get a session's cached graph without marking it as accessed.
    ///
    /// Background refresh uses this so its own housekeeping never keeps an
    /// idle session alive.
    pub(crate) fn peek_session_graph(&self, session_id: &str) -> Option<Arc<CachedGraph<P>>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Store or replace a session's graph.
    ///
    /// If the projected total exceeds the memory budget, the least recently
    /// accessed other sessions are evicted first.
    pub fn set_session_graph(&self, session_id: &str, mut cached: CachedGraph<P>) {
        let estimated_mb = match cached.estimated_mb {
            Some(mb) if mb > 0.0 => mb,
            _ => estimate_graph_memory(&cached.payload),
        };
        cached.estimated_mb = Some(estimated_mb);

        let mut sessions = self.sessions.write();
        self.enforce_memory_budget(&mut sessions, session_id, estimated_mb);

        let nodes = cached.payload.node_count();
        sessions.insert(session_id.to_string(), Arc::new(cached));

        debug!(
            session_id = %session_id,
            nodes,
            estimated_mb,
            sessions = sessions.len(),
            "Set graph cache for session"
        );
    }

    /// Remove a session's graph. Returns whether it was cached.
    pub fn evict(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.remove(session_id) {
            Some(cached) => {
                self.metrics.record_eviction(GRAPH_CACHE_METRICS_NAME);
                debug!(
                    session_id = %session_id,
                    freed_mb = cached.estimated_mb(),
                    "Evicted graph cache for session"
                );
                true
            }
            None => false,
        }
    }

    /// Remove every cached graph.
    pub fn clear(&self) {
        let mut sessions = self.sessions.write();
        let count = sessions.len();
        sessions.clear();
        debug!(count, "Cleared graph cache");
    }

    /// Number of sessions with a cached graph.
    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    /// Estimated memory held by all cached graphs, in MB.
    pub fn total_memory_mb(&self) -> f64 {
        total_memory_mb(&self.sessions.read())
    }

    /// Check if a session has a cached graph (without touching it).
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Ids of all sessions with a cached graph.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Inject the generator refresh jobs use to rebuild graphs.
    pub fn set_graph_generator(&self, generator: Arc<dyn GraphGenerator<P>>) {
        *self.generator.write() = Some(generator);
    }

    /// The injected graph generator, if any.
    pub fn graph_generator(&self) -> Option<Arc<dyn GraphGenerator<P>>> {
        self.generator.read().clone()
    }

    /// Make room for `incoming_mb` under the budget. Must hold the write lock.
    fn enforce_memory_budget(
        &self,
        sessions: &mut HashMap<String, Arc<CachedGraph<P>>>,
        session_id: &str,
        incoming_mb: f64,
    ) {
        let mut current_mb = total_memory_mb(sessions);
        if let Some(old) = sessions.get(session_id) {
            current_mb -= old.estimated_mb();
        }

        let projected_mb = current_mb + incoming_mb;
        let budget_mb = self.config.max_cache_memory_mb as f64;
        if projected_mb <= budget_mb {
            return;
        }

        debug!(
            projected_mb,
            budget_mb,
            "Graph cache over memory budget, evicting least recently accessed sessions"
        );
        self.evict_lru(sessions, session_id, projected_mb - budget_mb);
    }

    /// Evict least recently accessed sessions, other than `keep`, until at
    /// least `target_mb` has been freed or nothing else is left.
    fn evict_lru(
        &self,
        sessions: &mut HashMap<String, Arc<CachedGraph<P>>>,
        keep: &str,
        target_mb: f64,
    ) {
        let mut candidates: Vec<(DateTime<Utc>, String)> = sessions
            .iter()
            .filter(|(id, _)| id.as_str() != keep)
            .map(|(id, cached)| (cached.last_accessed(), id.clone()))
            .collect();
        candidates.sort();

        let mut freed_mb = 0.0;
        let mut evicted = 0;
        for (last_accessed, id) in candidates {
            if freed_mb >= target_mb {
                break;
            }
            if let Some(cached) = sessions.remove(&id) {
                trace!(
                    session_id = %id,
                    last_accessed = %last_accessed,
                    estimated_mb = cached.estimated_mb(),
                    "Evicting graph cache session due to memory limit"
                );
                self.metrics.record_eviction(GRAPH_CACHE_METRICS_NAME);
                freed_mb += cached.estimated_mb();
                evicted += 1;
            }
        }

        debug!(freed_mb, evicted, "Freed graph cache memory");
    }
}

impl<P> Clone for SessionGraphCache<P> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            generator: Arc::clone(&self.generator),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

fn total_memory_mb<P: GraphPayload>(sessions: &HashMap<String, Arc<CachedGraph<P>>>) -> f64 {
    sessions.values().map(|cached| cached.estimated_mb()).sum()
}
