//! Error types for graph cache operations.

/// Error type for graph cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session has no cached graph or no refresh job.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Graph caching is turned off in the configuration.
    #[error("Graph cache is disabled")]
    Disabled,

    /// No graph generator has been injected into the cache.
    #[error("No graph generator configured")]
    NoGenerator,
}

/// Result type for graph cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by a [`GraphGenerator`](crate::GraphGenerator).
///
/// Generation failures come from outside this crate (telemetry backends,
/// cluster clients) so they are carried as opaque boxed errors.
pub type GenerateError = Box<dyn std::error::Error + Send + Sync>;
