//! Graph payloads and generators shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::GenerateError;
use crate::graph::{GraphOptions, GraphPayload};
use crate::refresh::GraphGenerator;

/// Graph stand-in that only knows its size.
#[derive(Debug, Clone, PartialEq)]
pub struct TestGraph {
    pub nodes: usize,
    pub edges: usize,
}

impl TestGraph {
    pub fn new(nodes: usize, edges: usize) -> Self {
        Self { nodes, edges }
    }
}

impl GraphPayload for TestGraph {
    fn node_count(&self) -> usize {
        self.nodes
    }

    fn edge_count(&self) -> usize {
        self.edges
    }
}

pub fn test_options() -> GraphOptions {
    GraphOptions::new("versionedApp", Duration::from_secs(60))
        .with_namespaces(["bookinfo"])
        .with_param("injectServiceNodes", "true")
}

/// Returns a fixed-size graph and counts calls.
pub struct CountingGenerator {
    nodes: usize,
    calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphGenerator<TestGraph> for CountingGenerator {
    async fn generate(
        &self,
        _cancel: CancellationToken,
        _options: GraphOptions,
    ) -> Result<TestGraph, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TestGraph::new(self.nodes, self.nodes))
    }
}

/// Always fails.
pub struct FailingGenerator;

#[async_trait]
impl GraphGenerator<TestGraph> for FailingGenerator {
    async fn generate(
        &self,
        _cancel: CancellationToken,
        _options: GraphOptions,
    ) -> Result<TestGraph, GenerateError> {
        Err("telemetry backend unavailable".into())
    }
}

/// Records the query time of every request.
pub struct QueryTimeRecorder {
    nodes: usize,
    query_times: Mutex<Vec<DateTime<Utc>>>,
}

impl QueryTimeRecorder {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            query_times: Mutex::new(Vec::new()),
        }
    }

    pub fn query_times(&self) -> Vec<DateTime<Utc>> {
        self.query_times.lock().clone()
    }
}

#[async_trait]
impl GraphGenerator<TestGraph> for QueryTimeRecorder {
    async fn generate(
        &self,
        _cancel: CancellationToken,
        options: GraphOptions,
    ) -> Result<TestGraph, GenerateError> {
        self.query_times.lock().push(options.query_time);
        Ok(TestGraph::new(self.nodes, self.nodes))
    }
}
