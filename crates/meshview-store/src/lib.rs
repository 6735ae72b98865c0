//! Reusable in-process key/value stores.
//!
//! This crate provides the building blocks the rest of meshview caches with:
//! - [`ThreadSafeStore`]: a lock-protected map with a mutation version counter
//! - [`ExpirationStore`]: sliding TTL expiry with a background sweeper
//! - [`FifoStore`]: a capacity bound with oldest-inserted eviction
//!
//! All of them implement the [`Store`] trait, so decorators can be stacked.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshview_store::{ExpirationConfig, ExpirationStore, Store, ThreadSafeStore};
//!
//! let store = ExpirationStore::new(
//!     ThreadSafeStore::<String, Mesh>::new(),
//!     ExpirationConfig::default().with_ttl(Duration::from_secs(30)),
//!     shutdown.child_token(),
//! );
//! store.set("mesh".to_string(), mesh);
//! ```

mod error;
mod expiration;
mod fifo;
mod metrics;
mod store;

pub use error::{Error, Result};
pub use expiration::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL, ExpirationConfig, ExpirationStore};
pub use fifo::FifoStore;
pub use metrics::{CacheCounters, CacheMetrics, CounterSnapshot, NoopMetrics};
pub use store::{Store, StoreKey, StoreValue, ThreadSafeStore};
