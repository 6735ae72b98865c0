//! Per-session graph cache for meshview.
//!
//! Graphs are expensive to build from mesh telemetry, and a console user
//! tends to poll the same graph over and over. This crate keeps one graph per
//! session and keeps it fresh in the background:
//!
//! - [`SessionGraphCache`]: session id to [`CachedGraph`], bounded by an
//!   aggregate memory budget with least-recently-accessed eviction
//! - [`RefreshJob`]: regenerates one session's graph on an interval, moving
//!   the time window forward, and evicts the session once it goes idle
//! - [`RefreshJobManager`]: at most one refresh job per session
//!
//! Graph construction itself is injected through [`GraphGenerator`].
//!
//! # Example
//!
//! ```rust,ignore
//! use meshview_graph_cache::{CachedGraph, GraphCacheConfig, RefreshJobManager, SessionGraphCache};
//!
//! let cache = SessionGraphCache::new(GraphCacheConfig::new().with_enabled(true));
//! cache.set_graph_generator(Arc::new(generator));
//! cache.set_session_graph("session-1", CachedGraph::new(graph, options, interval));
//!
//! let manager = RefreshJobManager::new(&shutdown);
//! manager.start_cached_job("session-1", &cache)?;
//! ```

mod cache;
mod config;
mod error;
mod graph;
mod refresh;

#[cfg(test)]
mod testing;

pub use cache::{CachedGraph, GRAPH_CACHE_METRICS_NAME, SessionGraphCache};
pub use config::{
    DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_MAX_CACHE_MEMORY_MB, DEFAULT_REFRESH_INTERVAL,
    GraphCacheConfig, GraphCacheSettings,
};
pub use error::{Error, GenerateError, Result};
pub use graph::{GraphOptions, GraphPayload, estimate_graph_memory};
pub use refresh::{GraphGenerator, RefreshJob, RefreshJobManager, RefreshOutcome};
