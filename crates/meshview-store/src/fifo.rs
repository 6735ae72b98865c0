//! Capacity-bounded [`Store`] that evicts the oldest inserted key.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::metrics::{CacheMetrics, NoopMetrics};
use crate::store::{Store, StoreKey, StoreValue};

struct FifoShared<K, V, S> {
    inner: S,
    /// Insertion order, oldest at the front. Holds exactly the resident keys.
    order: Mutex<VecDeque<K>>,
    capacity: usize,
    name: String,
    metrics: Arc<dyn CacheMetrics>,
    _value: PhantomData<fn() -> V>,
}

/// A [`Store`] decorator holding at most `capacity` keys.
///
/// The first write to a key wins: setting a key that is already resident is
/// a no-op and does not move it in the eviction order. When full, inserting a
/// new key evicts the single oldest inserted key.
pub struct FifoStore<K, V, S> {
    shared: Arc<FifoShared<K, V, S>>,
}

impl<K: StoreKey, V: StoreValue, S: Store<K, V>> FifoStore<K, V, S> {
    /// Wrap `inner` with a capacity bound and no metrics.
    pub fn new(inner: S, capacity: usize, name: impl Into<String>) -> Self {
        Self::with_metrics(inner, capacity, name, Arc::new(NoopMetrics))
    }

    /// Wrap `inner` with a capacity bound, reporting requests, hits and
    /// evictions to `metrics` under `name`.
    ///
    /// A zero capacity is treated as one. Keys already in `inner` are adopted
    /// in arbitrary order, dropping any beyond capacity.
    pub fn with_metrics(
        inner: S,
        capacity: usize,
        name: impl Into<String>,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Self {
        let capacity = capacity.max(1);
        let mut order: VecDeque<K> = inner.keys().into();
        while order.len() > capacity {
            if let Some(key) = order.pop_front() {
                inner.remove(&key);
            }
        }

        Self {
            shared: Arc::new(FifoShared {
                inner,
                order: Mutex::new(order),
                capacity,
                name: name.into(),
                metrics,
                _value: PhantomData,
            }),
        }
    }

    /// Maximum number of resident keys.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Name used when reporting metrics.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Resident keys from oldest to newest.
    pub fn ordered_keys(&self) -> Vec<K> {
        self.shared.order.lock().iter().cloned().collect()
    }
}

impl<K, V, S> Clone for FifoStore<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: StoreKey, V: StoreValue, S: Store<K, V>> Store<K, V> for FifoStore<K, V, S> {
    fn get(&self, key: &K) -> Option<V> {
        let shared = &self.shared;
        shared.metrics.record_request(&shared.name);
        let value = shared.inner.get(key);
        if value.is_some() {
            shared.metrics.record_hit(&shared.name);
        }
        value
    }

    fn set(&self, key: K, value: V) {
        let shared = &self.shared;
        let mut order = shared.order.lock();

        if shared.inner.contains(&key) {
            trace!(cache = %shared.name, key = ?key, "Key already cached, keeping first value");
            return;
        }

        if order.len() >= shared.capacity
            && let Some(oldest) = order.pop_front()
        {
            debug!(cache = %shared.name, key = ?oldest, "Evicting oldest entry to make room");
            shared.inner.remove(&oldest);
            shared.metrics.record_eviction(&shared.name);
        }

        order.push_back(key.clone());
        shared.inner.set(key, value);
    }

    fn replace(&self, items: Option<HashMap<K, V>>) {
        let shared = &self.shared;
        let mut order = shared.order.lock();

        match items {
            None => {
                order.clear();
                shared.inner.replace(None);
            }
            Some(items) => {
                let kept: HashMap<K, V> = items.into_iter().take(shared.capacity).collect();
                *order = kept.keys().cloned().collect();
                shared.inner.replace(Some(kept));
            }
        }
    }

    fn remove(&self, key: &K) {
        let shared = &self.shared;
        let mut order = shared.order.lock();

        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
            shared.inner.remove(key);
        }
    }

    fn keys(&self) -> Vec<K> {
        self.shared.inner.keys()
    }

    fn items(&self) -> HashMap<K, V> {
        self.shared.inner.items()
    }

    fn version(&self) -> u64 {
        self.shared.inner.version()
    }

    fn len(&self) -> usize {
        self.shared.order.lock().len()
    }

    fn contains(&self, key: &K) -> bool {
        self.shared.inner.contains(key)
    }
}
