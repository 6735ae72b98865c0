//! Graph payloads, the options that produce them, and memory estimation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Approximate bytes held per graph node, including its metadata.
const BYTES_PER_NODE: usize = 3000;

/// Approximate bytes held per graph edge, including its metadata.
const BYTES_PER_EDGE: usize = 1000;

/// Multiplier covering the map structure around nodes and edges.
const STRUCTURE_OVERHEAD: f64 = 1.1;

/// A cached graph value.
///
/// The cache treats graphs as opaque; it only needs their size to account
/// for them against the memory budget.
pub trait GraphPayload: Clone + Send + Sync + 'static {
    /// Number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// Number of edges in the graph.
    fn edge_count(&self) -> usize;
}

/// Estimate the memory held by a graph, in MB.
///
/// This is a rough heuristic (about 3 KB per node and 1 KB per edge plus 10%
/// structural overhead), not a measurement.
pub fn estimate_graph_memory<P: GraphPayload>(payload: &P) -> f64 {
    let bytes = payload.node_count() * BYTES_PER_NODE + payload.edge_count() * BYTES_PER_EDGE;
    (bytes as f64 / (1024.0 * 1024.0)) * STRUCTURE_OVERHEAD
}

/// Options a graph was generated with.
///
/// `query_time` is the end of the telemetry window and `duration` its length,
/// so a graph covers `[query_time - duration, query_time]`. Background
/// refreshes move `query_time` forward and keep everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphOptions {
    /// Kind of graph (app, versioned app, workload, service).
    pub graph_type: String,

    /// Namespaces the graph covers.
    pub namespaces: Vec<String>,

    /// Length of the telemetry window.
    pub duration: Duration,

    /// End of the telemetry window.
    pub query_time: DateTime<Utc>,

    /// Any further request parameters, passed through untouched.
    pub params: BTreeMap<String, String>,
}

impl GraphOptions {
    /// Create options for a graph type and window length ending now.
    pub fn new(graph_type: impl Into<String>, duration: Duration) -> Self {
        Self {
            graph_type: graph_type.into(),
            namespaces: Vec::new(),
            duration,
            query_time: Utc::now(),
            params: BTreeMap::new(),
        }
    }

    /// Set the namespaces.
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Set the end of the telemetry window.
    pub fn with_query_time(mut self, query_time: DateTime<Utc>) -> Self {
        self.query_time = query_time;
        self
    }

    /// Add a pass-through parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// A copy of these options with the window moved to end at `query_time`.
    pub fn at_query_time(&self, query_time: DateTime<Utc>) -> Self {
        self.clone().with_query_time(query_time)
    }

    /// Start of the telemetry window.
    pub fn window_start(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|duration| self.query_time.checked_sub_signed(duration))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
