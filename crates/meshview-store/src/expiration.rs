//! Sliding TTL expiry layered over a [`Store`].
//!
//! Every `set` (re)stamps the key with `now + ttl`. A background task sweeps
//! the store on a fixed interval and removes keys whose stamp has passed.
//! Cancelling the supplied token clears the store and stops the sweeper.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::store::{Store, StoreKey, StoreValue};

/// Default time-to-live for entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for an [`ExpirationStore`].
#[derive(Debug, Clone)]
pub struct ExpirationConfig {
    /// How long a key lives after its most recent `set`.
    pub ttl: Duration,

    /// How often the background task looks for expired keys.
    pub sweep_interval: Duration,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl ExpirationConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// State shared between the store handle and its sweeper task.
///
/// The expiry map lock is held across every paired mutation of the inner
/// store and the stamps, so a sweep never interleaves with a `set` on the
/// same key.
struct Shared<K, V, S> {
    inner: S,
    expirations: Mutex<HashMap<K, Instant>>,
    ttl: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<K: StoreKey, V: StoreValue, S: Store<K, V>> Shared<K, V, S> {
    fn sweep(&self) -> usize {
        let mut expirations = self.expirations.lock();
        let now = Instant::now();
        let mut removed = 0;

        for key in self.inner.keys() {
            match expirations.get(&key) {
                Some(expires_at) if *expires_at <= now => {
                    self.inner.remove(&key);
                    expirations.remove(&key);
                    removed += 1;
                }
                Some(_) => {}
                // Written to the inner store without a stamp yet
                None => trace!(key = ?key, "Key has no expiration stamp, skipping"),
            }
        }

        let inner = &self.inner;
        expirations.retain(|key, _| inner.contains(key));

        if removed > 0 {
            debug!(count = removed, "Swept expired keys");
        }
        removed
    }

    fn clear(&self) {
        let mut expirations = self.expirations.lock();
        self.inner.replace(None);
        expirations.clear();
    }
}

/// A [`Store`] decorator that expires keys a fixed time after their last `set`.
///
/// Reads pass straight through to the inner store; a key that has expired but
/// not yet been swept is still returned. Cloning yields another handle to the
/// same store and sweeper.
pub struct ExpirationStore<K, V, S> {
    shared: Arc<Shared<K, V, S>>,
}

impl<K: StoreKey, V: StoreValue, S: Store<K, V> + 'static> ExpirationStore<K, V, S> {
    /// Wrap `inner` and start the sweeper.
    ///
    /// Must be called from within a Tokio runtime. The sweeper runs until
    /// `cancel` fires, at which point the store is cleared, or until the last
    /// handle is dropped.
    pub fn new(inner: S, config: ExpirationConfig, cancel: CancellationToken) -> Self {
        Self::spawn(inner, config, cancel, None)
    }

    /// Like [`ExpirationStore::new`], but also signals `stopped` once the
    /// sweeper exits: after the store has been cleared on cancellation, or
    /// after every handle to the store has been dropped. A dropped receiver is
    /// ignored.
    pub fn with_stop_signal(
        inner: S,
        config: ExpirationConfig,
        cancel: CancellationToken,
        stopped: oneshot::Sender<()>,
    ) -> Self {
        Self::spawn(inner, config, cancel, Some(stopped))
    }

    fn spawn(
        inner: S,
        config: ExpirationConfig,
        cancel: CancellationToken,
        mut stopped: Option<oneshot::Sender<()>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            inner,
            expirations: Mutex::new(HashMap::new()),
            ttl: config.ttl,
            _value: PhantomData,
        });

        let sweeper = Arc::downgrade(&shared);
        let sweep_interval = config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Expiration store cancelled, clearing");
                        if let Some(shared) = sweeper.upgrade() {
                            shared.clear();
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        // Every handle is gone; nothing left to sweep
                        let Some(shared) = sweeper.upgrade() else {
                            debug!("Expiration store dropped, stopping sweeper");
                            break;
                        };
                        shared.sweep();
                    }
                }
            }

            if let Some(tx) = stopped.take()
                && tx.send(()).is_err()
            {
                trace!("Nobody waiting for expiration store stop signal");
            }
        });

        Self { shared }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    /// When `key` is due to expire, if it is stamped.
    pub fn expires_at(&self, key: &K) -> Option<Instant> {
        self.shared.expirations.lock().get(key).copied()
    }

    /// Number of keys carrying an expiration stamp.
    pub fn tracked(&self) -> usize {
        self.shared.expirations.lock().len()
    }

    /// Run one sweep immediately and return how many keys were removed.
    pub fn sweep_now(&self) -> usize {
        self.shared.sweep()
    }
}

impl<K, V, S> Clone for ExpirationStore<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: StoreKey, V: StoreValue, S: Store<K, V> + 'static> Store<K, V>
    for ExpirationStore<K, V, S>
{
    fn get(&self, key: &K) -> Option<V> {
        self.shared.inner.get(key)
    }

    fn set(&self, key: K, value: V) {
        let mut expirations = self.shared.expirations.lock();
        let inner = &self.shared.inner;
        inner.set(key.clone(), value);
        expirations.insert(key, Instant::now() + self.shared.ttl);

        // A bounded inner store may have evicted another key to make room
        if expirations.len() > inner.len() {
            expirations.retain(|key, _| inner.contains(key));
        }
    }

    fn replace(&self, items: Option<HashMap<K, V>>) {
        let mut expirations = self.shared.expirations.lock();
        expirations.clear();
        self.shared.inner.replace(items);

        // Stamp only what the inner store kept
        let expires_at = Instant::now() + self.shared.ttl;
        expirations.extend(
            self.shared
                .inner
                .keys()
                .into_iter()
                .map(|key| (key, expires_at)),
        );
    }

    fn remove(&self, key: &K) {
        let mut expirations = self.shared.expirations.lock();
        self.shared.inner.remove(key);
        expirations.remove(key);
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
        self.shared.inner.len()
    }

    fn contains(&self, key: &K) -> bool {
        self.shared.inner.contains(key)
    }
}
