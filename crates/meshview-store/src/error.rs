//! Error types for store operations.

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key was not present in the store.
    #[error("Key not found: {0}")]
    NotFound(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
