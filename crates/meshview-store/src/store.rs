//! Generic thread-safe key/value store with a mutation version counter.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Types usable as store keys.
pub trait StoreKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> StoreKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Types usable as store values.
pub trait StoreValue: Clone + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Clone + Send + Sync + 'static {}

/// A key/value store that is safe for unrestricted concurrent use.
///
/// A write is visible to every read that starts after the write returns.
/// Every mutating call (`set`, `replace`, `remove`) bumps [`Store::version`],
/// reads never do.
pub trait Store<K: StoreKey, V: StoreValue>: Send + Sync {
    /// Get a value, or `None` if the key is absent.
    fn get(&self, key: &K) -> Option<V>;

    /// Get a value, failing with [`Error::NotFound`] if the key is absent.
    fn try_get(&self, key: &K) -> Result<V> {
        self.get(key).ok_or_else(|| Error::NotFound(format!("{key:?}")))
    }

    /// Insert or overwrite a value.
    fn set(&self, key: K, value: V);

    /// Atomically swap the whole contents. `None` clears the store.
    fn replace(&self, items: Option<HashMap<K, V>>);

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &K);

    /// Snapshot of the resident keys.
    fn keys(&self) -> Vec<K>;

    /// Snapshot of the resident entries.
    fn items(&self) -> HashMap<K, V>;

    /// Monotonic mutation counter.
    fn version(&self) -> u64;

    /// Number of resident keys.
    fn len(&self) -> usize {
        self.keys().len()
    }

    /// Check if the store holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a key is resident.
    fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
}

/// State protected by the store lock. The version lives under the same lock
/// as the data so a bump is atomic with the mutation it counts.
#[derive(Debug)]
struct StoreState<K, V> {
    data: HashMap<K, V>,
    version: u64,
}

/// Plain [`Store`] backed by a `HashMap` under a read/write lock.
///
/// Cloning yields another handle to the same underlying map.
#[derive(Debug)]
pub struct ThreadSafeStore<K, V> {
    state: Arc<RwLock<StoreState<K, V>>>,
}

impl<K: StoreKey, V: StoreValue> ThreadSafeStore<K, V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_items(HashMap::new())
    }

    /// Create a store pre-populated with `items`.
    pub fn with_items(items: HashMap<K, V>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                data: items,
                version: 0,
            })),
        }
    }
}

impl<K: StoreKey, V: StoreValue> Default for ThreadSafeStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for ThreadSafeStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K: StoreKey, V: StoreValue> Store<K, V> for ThreadSafeStore<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        self.state.read().data.get(key).cloned()
    }

    fn set(&self, key: K, value: V) {
        let mut state = self.state.write();
        state.data.insert(key, value);
        state.version += 1;
    }

    fn replace(&self, items: Option<HashMap<K, V>>) {
        let mut state = self.state.write();
        state.data = items.unwrap_or_default();
        state.version += 1;
    }

    fn remove(&self, key: &K) {
        let mut state = self.state.write();
        state.data.remove(key);
        state.version += 1;
    }

    fn keys(&self) -> Vec<K> {
        self.state.read().data.keys().cloned().collect()
    }

    fn items(&self) -> HashMap<K, V> {
        self.state.read().data.clone()
    }

    fn version(&self) -> u64 {
        self.state.read().version
    }

    fn len(&self) -> usize {
        self.state.read().data.len()
    }

    fn contains(&self, key: &K) -> bool {
        self.state.read().data.contains_key(key)
    }
}
