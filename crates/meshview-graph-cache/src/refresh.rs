//! Background refresh of cached session graphs.
//!
//! Each session with a cached graph gets one [`RefreshJob`]: a Tokio task that
//! regenerates the graph on a ticker with a moving time window, so a user
//! polling the cache always sees recent traffic. A job stops itself when its
//! session is evicted or has gone unread for longer than the inactivity
//! timeout. [`RefreshJobManager`] keeps at most one job per session.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::cache::{CachedGraph, SessionGraphCache};
use crate::error::{Error, GenerateError, Result};
use crate::graph::{GraphOptions, GraphPayload, estimate_graph_memory};

/// Shortest refresh interval a job will tick at.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// Rebuilds a session's graph from its options.
///
/// Called concurrently from many refresh jobs, possibly more than once at a
/// time for the same session. Implementations should give up early when
/// `cancel` fires.
#[async_trait]
pub trait GraphGenerator<P>: Send + Sync {
    /// Generate a graph for `options`.
    async fn generate(
        &self,
        cancel: CancellationToken,
        options: GraphOptions,
    ) -> std::result::Result<P, GenerateError>;
}

#[async_trait]
impl<P, F, Fut> GraphGenerator<P> for F
where
    P: Send + 'static,
    F: Fn(CancellationToken, GraphOptions) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<P, GenerateError>> + Send + 'static,
{
    async fn generate(
        &self,
        cancel: CancellationToken,
        options: GraphOptions,
    ) -> std::result::Result<P, GenerateError> {
        (self)(cancel, options).await
    }
}

/// What a single refresh cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new graph was generated and stored.
    Refreshed,

    /// Generation failed; the previous graph was left in place.
    Failed,

    /// The session had been idle too long and was evicted. The job stopped.
    Inactive,

    /// The session was no longer cached. The job stopped.
    Missing,

    /// The job was stopped before or during generation; nothing was stored.
    Cancelled,
}

#[derive(Debug)]
struct JobState {
    started: bool,
    stopped: bool,
    refresh_interval: Duration,
}

/// Background refresh for a single session's graph.
pub struct RefreshJob<P> {
    session_id: String,
    options: GraphOptions,
    cache: SessionGraphCache<P>,
    generator: Arc<dyn GraphGenerator<P>>,
    cancel: CancellationToken,
    state: Mutex<JobState>,
    interval_tx: watch::Sender<Duration>,
}

impl<P: GraphPayload> RefreshJob<P> {
    /// Create a job for `session_id`. Nothing runs until [`RefreshJob::start`].
    ///
    /// The job stops when `parent` is cancelled.
    pub fn new(
        parent: &CancellationToken,
        session_id: impl Into<String>,
        options: GraphOptions,
        cache: SessionGraphCache<P>,
        generator: Arc<dyn GraphGenerator<P>>,
        refresh_interval: Duration,
    ) -> Self {
        let (interval_tx, _) = watch::channel(refresh_interval);
        Self {
            session_id: session_id.into(),
            options,
            cache,
            generator,
            cancel: parent.child_token(),
            state: Mutex::new(JobState {
                started: false,
                stopped: false,
                refresh_interval,
            }),
            interval_tx,
        }
    }

    /// Session this job refreshes.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        self.state.lock().refresh_interval
    }

    /// Options the job was created with. Refreshes use these with `query_time`
    /// moved to the time of the refresh.
    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    /// Whether the job has stopped, by request or because its parent was
    /// cancelled.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped || self.cancel.is_cancelled()
    }

    /// Run the refresh loop until the job is stopped.
    ///
    /// Refreshes once immediately, then once per tick. Each refresh runs in
    /// its own task so a slow generator never delays the next tick. Calling
    /// this on a job that is already running, stopped, or whose parent has
    /// been cancelled returns at once without refreshing.
    pub async fn start(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.started || state.stopped {
                return;
            }
            if self.cancel.is_cancelled() {
                state.stopped = true;
                trace!(session_id = %self.session_id, "Refresh job cancelled before start");
                return;
            }
            state.started = true;
        }

        let mut interval_rx = self.interval_tx.subscribe();
        let period = *interval_rx.borrow_and_update();
        let mut ticker = refresh_ticker(period);

        debug!(session_id = %self.session_id, interval = ?period, "Starting graph cache refresh job");

        self.spawn_refresh();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(session_id = %self.session_id, "Graph cache refresh job stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.spawn_refresh();
                }
                Ok(()) = interval_rx.changed() => {
                    let period = *interval_rx.borrow_and_update();
                    ticker = refresh_ticker(period);
                }
            }
        }

        self.state.lock().stopped = true;
    }

    /// Stop the job. Safe to call repeatedly and from several tasks at once.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.cancel.cancel();
        trace!(session_id = %self.session_id, "Graph cache refresh job stop requested");
    }

    /// Change the refresh interval of a running job.
    ///
    /// The ticker restarts, so the next refresh happens one new interval from
    /// now. No-op if the job is stopped or the interval is unchanged.
    pub fn update_interval(&self, interval: Duration) {
        let mut state = self.state.lock();
        if state.stopped || state.refresh_interval == interval {
            return;
        }

        debug!(
            session_id = %self.session_id,
            from = ?state.refresh_interval,
            to = ?interval,
            "Updating graph cache refresh interval"
        );
        state.refresh_interval = interval;
        self.interval_tx.send_replace(interval);
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            job.refresh().await;
        });
    }

    /// Run one refresh cycle.
    ///
    /// Reads the session without touching it, evicts it if it has been idle
    /// past the inactivity timeout, otherwise regenerates the graph for a
    /// window ending now and stores it with the previous last-accessed time.
    /// A failed generation keeps the previous graph and leaves the job running.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.cancel.is_cancelled() {
            return RefreshOutcome::Cancelled;
        }

        let Some(cached) = self.cache.peek_session_graph(&self.session_id) else {
            debug!(session_id = %self.session_id, "Session graph no longer cached, stopping refresh job");
            self.stop();
            return RefreshOutcome::Missing;
        };

        let idle = cached.idle_for();
        let timeout = self.cache.config().inactivity_timeout;
        if idle > timeout {
            debug!(
                session_id = %self.session_id,
                idle = ?idle,
                timeout = ?timeout,
                "Session inactive, evicting from graph cache and stopping refresh"
            );
            self.cache.evict(&self.session_id);
            self.stop();
            return RefreshOutcome::Inactive;
        }

        let refreshed_options = self.options.at_query_time(Utc::now());
        trace!(
            session_id = %self.session_id,
            duration = ?refreshed_options.duration,
            query_time = %refreshed_options.query_time,
            "Refreshing graph cache"
        );

        let started = Instant::now();
        let payload = match self
            .generator
            .generate(self.cancel.child_token(), refreshed_options.clone())
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    session_id = %self.session_id,
                    error = %e,
                    "Failed to refresh graph cache, keeping previous graph"
                );
                return RefreshOutcome::Failed;
            }
        };
        let elapsed = started.elapsed();

        if self.cancel.is_cancelled() {
            trace!(session_id = %self.session_id, "Refresh job stopped during generation, discarding graph");
            return RefreshOutcome::Cancelled;
        }

        // Evicted while generating: storing now would bring the session back
        let Some(current) = self.cache.peek_session_graph(&self.session_id) else {
            debug!(session_id = %self.session_id, "Session graph evicted during refresh, stopping refresh job");
            self.stop();
            return RefreshOutcome::Missing;
        };
        // A refresh is not an access; a read that landed mid-refresh still counts
        let last_accessed = cached.last_accessed().max(current.last_accessed());

        let nodes = payload.node_count();
        let estimated_mb = estimate_graph_memory(&payload);
        let refreshed = CachedGraph::new(payload, refreshed_options, self.refresh_interval())
            .with_last_accessed(last_accessed)
            .with_estimated_mb(estimated_mb);
        self.cache.set_session_graph(&self.session_id, refreshed);

        debug!(
            session_id = %self.session_id,
            nodes,
            estimated_mb,
            elapsed = ?elapsed,
            "Refreshed graph cache"
        );
        RefreshOutcome::Refreshed
    }
}

fn refresh_ticker(period: Duration) -> Interval {
    let period = period.max(MIN_REFRESH_INTERVAL);
    // The first refresh is spawned by hand, so the first tick is one period out
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

type JobRegistry<P> = Arc<RwLock<HashMap<String, Arc<RefreshJob<P>>>>>;

/// Tracks the refresh jobs of all sessions, at most one per session.
///
/// Cancelling the parent token passed to [`RefreshJobManager::new`] stops
/// every job.
pub struct RefreshJobManager<P> {
    cancel: CancellationToken,
    jobs: JobRegistry<P>,
}

impl<P: GraphPayload> RefreshJobManager<P> {
    /// Create a manager whose jobs stop when `parent` is cancelled.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start refreshing `session_id`, replacing any job it already has.
    ///
    /// Must be called from within a Tokio runtime. The job is dropped from
    /// the registry once it stops on its own.
    pub fn start_job(
        &self,
        session_id: &str,
        options: GraphOptions,
        cache: &SessionGraphCache<P>,
        generator: Arc<dyn GraphGenerator<P>>,
        refresh_interval: Duration,
    ) -> Arc<RefreshJob<P>> {
        let job = Arc::new(RefreshJob::new(
            &self.cancel,
            session_id,
            options,
            cache.clone(),
            generator,
            refresh_interval,
        ));

        {
            let mut jobs = self.jobs.write();
            if let Some(existing) = jobs.insert(session_id.to_string(), Arc::clone(&job)) {
                debug!(session_id = %session_id, "Replacing existing graph cache refresh job");
                existing.stop();
            }
        }

        let registry = Arc::clone(&self.jobs);
        let running = Arc::clone(&job);
        tokio::spawn(async move {
            Arc::clone(&running).start().await;
            let mut jobs = registry.write();
            if jobs
                .get(running.session_id())
                .is_some_and(|current| Arc::ptr_eq(current, &running))
            {
                jobs.remove(running.session_id());
            }
        });

        debug!(session_id = %session_id, interval = ?refresh_interval, "Started graph cache refresh job");
        job
    }

    /// Start refreshing a session that is already cached, using the cache's
    /// generator and the entry's own options and refresh interval.
    pub fn start_cached_job(
        &self,
        session_id: &str,
        cache: &SessionGraphCache<P>,
    ) -> Result<Arc<RefreshJob<P>>> {
        if !cache.enabled() {
            return Err(Error::Disabled);
        }
        let generator = cache.graph_generator().ok_or(Error::NoGenerator)?;
        let cached = cache
            .peek_session_graph(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;

        Ok(self.start_job(
            session_id,
            cached.options.clone(),
            cache,
            generator,
            cached.refresh_interval,
        ))
    }

    /// The job for `session_id`, if there is one.
    pub fn get_job(&self, session_id: &str) -> Option<Arc<RefreshJob<P>>> {
        self.jobs.read().get(session_id).cloned()
    }

    /// Stop and forget the job for `session_id`. Returns whether one existed.
    pub fn stop_job(&self, session_id: &str) -> bool {
        let removed = self.jobs.write().remove(session_id);
        match removed {
            Some(job) => {
                job.stop();
                debug!(session_id = %session_id, "Stopped graph cache refresh job");
                true
            }
            None => false,
        }
    }

    /// Change the refresh interval of a session's job.
    pub fn update_interval(&self, session_id: &str, interval: Duration) -> Result<()> {
        let job = self
            .get_job(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        job.update_interval(interval);
        Ok(())
    }

    /// Stop every job and cancel the manager.
    ///
    /// Jobs started afterwards stop immediately.
    pub fn stop_all(&self) {
        let jobs: Vec<_> = {
            let mut jobs = self.jobs.write();
            jobs.drain().map(|(_, job)| job).collect()
        };

        debug!(count = jobs.len(), "Stopping all graph cache refresh jobs");
        for job in jobs {
            job.stop();
        }
        self.cancel.cancel();
    }

    /// Number of registered jobs.
    pub fn active_job_count(&self) -> usize {
        self.jobs.read().len()
    }

    /// Whether `session_id` has a registered job.
    pub fn has_job(&self, session_id: &str) -> bool {
        self.jobs.read().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphCacheConfig;
    use crate::testing::{
        CountingGenerator, FailingGenerator, QueryTimeRecorder, TestGraph, test_options,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};

    fn test_cache() -> SessionGraphCache<TestGraph> {
        SessionGraphCache::new(
            GraphCacheConfig::new()
                .with_enabled(true)
                .with_inactivity_timeout(Duration::from_secs(300))
                .with_max_cache_memory_mb(50)
                .with_refresh_interval(Duration::from_secs(30)),
        )
    }

    fn seed(cache: &SessionGraphCache<TestGraph>, session_id: &str) {
        cache.set_session_graph(
            session_id,
            CachedGraph::new(TestGraph::new(5, 5), test_options(), Duration::from_secs(30)),
        );
    }

    fn new_job(
        cache: &SessionGraphCache<TestGraph>,
        generator: Arc<dyn GraphGenerator<TestGraph>>,
        interval: Duration,
    ) -> Arc<RefreshJob<TestGraph>> {
        Arc::new(RefreshJob::new(
            &CancellationToken::new(),
            "test-session",
            test_options(),
            cache.clone(),
            generator,
            interval,
        ))
    }

    #[test]
    fn test_new_job() {
        let cache = test_cache();
        let job = new_job(&cache, Arc::new(CountingGenerator::new(5)), Duration::from_secs(30));

        assert_eq!(job.session_id(), "test-session");
        assert_eq!(job.refresh_interval(), Duration::from_secs(30));
        assert!(!job.is_stopped());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let cache = test_cache();
        let job = new_job(&cache, Arc::new(CountingGenerator::new(5)), Duration::from_secs(30));

        job.stop();
        assert!(job.is_stopped());

        job.stop();
        assert!(job.is_stopped());
    }

    #[tokio::test]
    async fn test_refresh_moves_query_time_forward() {
        let cache = test_cache();
        let recorder = Arc::new(QueryTimeRecorder::new(5));
        let old_query_time = Utc::now() - chrono::Duration::minutes(5);
        let options = test_options().with_query_time(old_query_time);
        cache.set_session_graph(
            "test-session",
            CachedGraph::new(TestGraph::new(5, 5), options.clone(), Duration::from_secs(30)),
        );

        let job = RefreshJob::new(
            &CancellationToken::new(),
            "test-session",
            options,
            cache.clone(),
            recorder.clone(),
            Duration::from_secs(3600),
        );

        assert_eq!(job.refresh().await, RefreshOutcome::Refreshed);

        let query_times = recorder.query_times();
        assert_eq!(query_times.len(), 1);
        assert!(query_times[0] > old_query_time);
        assert!(Utc::now() - query_times[0] < chrono::Duration::seconds(5));

        // The stored graph carries the moved window too
        let stored = cache.peek_session_graph("test-session").unwrap();
        assert_eq!(stored.options.query_time, query_times[0]);
    }

    #[tokio::test]
    async fn test_refresh_evicts_inactive_session() {
        let cache = SessionGraphCache::new(
            GraphCacheConfig::new()
                .with_enabled(true)
                .with_inactivity_timeout(Duration::from_secs(60)),
        );
        cache.set_session_graph(
            "test-session",
            CachedGraph::new(TestGraph::new(5, 5), test_options(), Duration::from_secs(30))
                .with_last_accessed(Utc::now() - chrono::Duration::minutes(2)),
        );
        let generator = Arc::new(CountingGenerator::new(5));
        let job = new_job(&cache, generator.clone(), Duration::from_secs(3600));

        assert_eq!(job.refresh().await, RefreshOutcome::Inactive);

        assert!(!cache.contains("test-session"));
        assert!(job.is_stopped());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_missing_session_stops() {
        let cache = test_cache();
        let job = new_job(&cache, Arc::new(CountingGenerator::new(5)), Duration::from_secs(3600));

        assert_eq!(job.refresh().await, RefreshOutcome::Missing);
        assert!(job.is_stopped());
    }

    #[tokio::test]
    async fn test_refresh_generator_error_keeps_graph() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let before = cache.peek_session_graph("test-session").unwrap();

        let job = new_job(&cache, Arc::new(FailingGenerator), Duration::from_secs(3600));

        assert_eq!(job.refresh().await, RefreshOutcome::Failed);

        let after = cache.peek_session_graph("test-session").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.payload, TestGraph::new(5, 5));
        assert!(!job.is_stopped());
    }

    #[tokio::test]
    async fn test_refresh_preserves_last_accessed() {
        let cache = test_cache();
        let last_accessed = Utc::now() - chrono::Duration::seconds(30);
        let generated_at = Utc::now() - chrono::Duration::seconds(30);
        cache.set_session_graph(
            "test-session",
            CachedGraph::new(TestGraph::new(5, 5), test_options(), Duration::from_secs(30))
                .with_last_accessed(last_accessed)
                .with_generated_at(generated_at),
        );
        let job = new_job(&cache, Arc::new(CountingGenerator::new(8)), Duration::from_secs(3600));

        assert_eq!(job.refresh().await, RefreshOutcome::Refreshed);

        let refreshed = cache.peek_session_graph("test-session").unwrap();
        assert_eq!(refreshed.payload, TestGraph::new(8, 8));
        assert_eq!(refreshed.last_accessed(), last_accessed);
        assert!(refreshed.generated_at > generated_at);
    }

    #[tokio::test]
    async fn test_refresh_after_stop_discards_result() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let before = cache.peek_session_graph("test-session").unwrap();
        let job = new_job(&cache, Arc::new(CountingGenerator::new(9)), Duration::from_secs(3600));

        job.stop();

        assert_eq!(job.refresh().await, RefreshOutcome::Cancelled);
        let after = cache.peek_session_graph("test-session").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_closure_generator() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let generator = move |_cancel: CancellationToken, _options: GraphOptions| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GenerateError>(TestGraph::new(2, 1))
            }
        };
        let job = new_job(&cache, Arc::new(generator), Duration::from_secs(3600));

        assert_eq!(job.refresh().await, RefreshOutcome::Refreshed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_refreshes_on_every_tick() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let generator = Arc::new(CountingGenerator::new(5));
        let job = new_job(&cache, generator.clone(), Duration::from_millis(100));

        let handle = tokio::spawn(Arc::clone(&job).start());
        sleep(Duration::from_millis(350)).await;

        // One immediate refresh plus at least two ticks
        assert!(generator.calls() > 2);

        job.stop();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("job should stop")
            .unwrap();
        assert!(job.is_stopped());
    }

    #[tokio::test]
    async fn test_first_refresh_is_immediate() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let generator = Arc::new(CountingGenerator::new(5));
        let job = new_job(&cache, generator.clone(), Duration::from_secs(3600));

        tokio::spawn(Arc::clone(&job).start());
        sleep(Duration::from_millis(50)).await;

        assert_eq!(generator.calls(), 1);
        job.stop();
    }

    #[tokio::test]
    async fn test_start_after_stop_returns() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let generator = Arc::new(CountingGenerator::new(5));
        let job = new_job(&cache, generator.clone(), Duration::from_millis(10));

        job.stop();
        timeout(Duration::from_secs(1), Arc::clone(&job).start())
            .await
            .expect("start should return for a stopped job");

        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_start_under_cancelled_parent_does_nothing() {
        let cache = SessionGraphCache::new(
            GraphCacheConfig::new()
                .with_enabled(true)
                .with_inactivity_timeout(Duration::from_secs(60)),
        );
        cache.set_session_graph(
            "test-session",
            CachedGraph::new(TestGraph::new(5, 5), test_options(), Duration::from_secs(30))
                .with_last_accessed(Utc::now() - chrono::Duration::minutes(2)),
        );
        let parent = CancellationToken::new();
        parent.cancel();
        let generator = Arc::new(CountingGenerator::new(5));
        let job = Arc::new(RefreshJob::new(
            &parent,
            "test-session",
            test_options(),
            cache.clone(),
            generator.clone(),
            Duration::from_millis(10),
        ));
        assert!(job.is_stopped());

        timeout(Duration::from_secs(1), Arc::clone(&job).start())
            .await
            .expect("start should return under a cancelled parent");
        sleep(Duration::from_millis(30)).await;

        // Idle past the timeout, but a stopped job must not evict it
        assert_eq!(generator.calls(), 0);
        assert!(cache.contains("test-session"));
        assert_eq!(job.refresh().await, RefreshOutcome::Cancelled);
        assert!(cache.contains("test-session"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stop() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let generator = Arc::new(CountingGenerator::new(5));
        let job = new_job(&cache, generator.clone(), Duration::from_millis(5));
        let running = tokio::spawn(Arc::clone(&job).start());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let job = Arc::clone(&job);
            handles.push(tokio::spawn(async move {
                job.stop();
                assert!(job.is_stopped());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        timeout(Duration::from_secs(1), running)
            .await
            .expect("job should stop")
            .unwrap();
        assert!(job.is_stopped());

        // Let refreshes already in flight drain, then nothing new may start
        sleep(Duration::from_millis(20)).await;
        let calls = generator.calls();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(generator.calls(), calls);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_job() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let parent = CancellationToken::new();
        let job = Arc::new(RefreshJob::new(
            &parent,
            "test-session",
            test_options(),
            cache.clone(),
            Arc::new(CountingGenerator::new(5)),
            Duration::from_millis(50),
        ));

        let handle = tokio::spawn(Arc::clone(&job).start());
        sleep(Duration::from_millis(20)).await;
        parent.cancel();

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("job should stop on parent cancellation")
            .unwrap();
        assert!(job.is_stopped());
    }

    #[tokio::test]
    async fn test_update_interval() {
        let cache = test_cache();
        seed(&cache, "test-session");
        let generator = Arc::new(CountingGenerator::new(5));
        let job = new_job(&cache, generator.clone(), Duration::from_secs(3600));

        tokio::spawn(Arc::clone(&job).start());
        sleep(Duration::from_millis(30)).await;
        assert_eq!(generator.calls(), 1);

        job.update_interval(Duration::from_millis(50));
        assert_eq!(job.refresh_interval(), Duration::from_millis(50));
        sleep(Duration::from_millis(230)).await;

        assert!(generator.calls() >= 3);
        job.stop();

        // Ignored once stopped
        job.update_interval(Duration::from_secs(1));
        assert_eq!(job.refresh_interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_manager_start_job() {
        let cache = test_cache();
        seed(&cache, "session-1");
        let manager = RefreshJobManager::new(&CancellationToken::new());
        let generator = Arc::new(CountingGenerator::new(5));

        let job = manager.start_job(
            "session-1",
            test_options(),
            &cache,
            generator.clone(),
            Duration::from_secs(3600),
        );

        assert!(manager.has_job("session-1"));
        assert_eq!(manager.active_job_count(), 1);
        assert!(Arc::ptr_eq(&manager.get_job("session-1").unwrap(), &job));

        sleep(Duration::from_millis(30)).await;
        assert_eq!(generator.calls(), 1);

        manager.stop_all();
    }

    #[tokio::test]
    async fn test_manager_stop_job() {
        let cache = test_cache();
        seed(&cache, "session-1");
        let manager = RefreshJobManager::new(&CancellationToken::new());
        let job = manager.start_job(
            "session-1",
            test_options(),
            &cache,
            Arc::new(CountingGenerator::new(5)),
            Duration::from_secs(3600),
        );

        assert!(manager.stop_job("session-1"));

        assert!(!manager.has_job("session-1"));
        assert_eq!(manager.active_job_count(), 0);
        assert!(job.is_stopped());
        assert!(!manager.stop_job("session-1"));
    }

    #[tokio::test]
    async fn test_manager_replaces_job() {
        let cache = test_cache();
        seed(&cache, "session-1");
        let manager = RefreshJobManager::new(&CancellationToken::new());

        let first = manager.start_job(
            "session-1",
            test_options(),
            &cache,
            Arc::new(CountingGenerator::new(5)),
            Duration::from_secs(3600),
        );
        let second = manager.start_job(
            "session-1",
            test_options(),
            &cache,
            Arc::new(CountingGenerator::new(5)),
            Duration::from_secs(3600),
        );

        assert!(first.is_stopped());
        assert!(!second.is_stopped());
        assert_eq!(manager.active_job_count(), 1);

        // The old job winding down must not unregister its replacement
        sleep(Duration::from_millis(30)).await;
        assert!(Arc::ptr_eq(&manager.get_job("session-1").unwrap(), &second));

        manager.stop_all();
    }

    #[tokio::test]
    async fn test_manager_stop_all() {
        let cache = test_cache();
        let manager = RefreshJobManager::new(&CancellationToken::new());
        let mut jobs = Vec::new();
        for i in 0..3 {
            let id = format!("session-{i}");
            seed(&cache, &id);
            jobs.push(manager.start_job(
                &id,
                test_options(),
                &cache,
                Arc::new(CountingGenerator::new(5)),
                Duration::from_secs(3600),
            ));
        }
        assert_eq!(manager.active_job_count(), 3);

        manager.stop_all();

        assert_eq!(manager.active_job_count(), 0);
        assert!(jobs.iter().all(|job| job.is_stopped()));
    }

    #[tokio::test]
    async fn test_manager_start_after_stop_all_does_nothing() {
        let cache = test_cache();
        seed(&cache, "session-1");
        let manager = RefreshJobManager::new(&CancellationToken::new());
        manager.stop_all();

        let generator = Arc::new(CountingGenerator::new(5));
        let job = manager.start_job(
            "session-1",
            test_options(),
            &cache,
            generator.clone(),
            Duration::from_millis(10),
        );
        assert!(job.is_stopped());

        sleep(Duration::from_millis(50)).await;

        assert_eq!(generator.calls(), 0);
        assert!(!manager.has_job("session-1"));
        assert!(cache.contains("session-1"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_manager_jobs() {
        let cache = test_cache();
        seed(&cache, "session-1");
        let parent = CancellationToken::new();
        let manager = RefreshJobManager::new(&parent);
        let job = manager.start_job(
            "session-1",
            test_options(),
            &cache,
            Arc::new(CountingGenerator::new(5)),
            Duration::from_secs(3600),
        );

        parent.cancel();
        sleep(Duration::from_millis(30)).await;

        assert!(job.is_stopped());
        assert!(!manager.has_job("session-1"));
    }

    #[tokio::test]
    async fn test_manager_prunes_self_stopped_jobs() {
        let cache = test_cache();
        let manager = RefreshJobManager::new(&CancellationToken::new());

        // Nothing cached, so the first refresh stops the job
        let job = manager.start_job(
            "ghost",
            test_options(),
            &cache,
            Arc::new(CountingGenerator::new(5)),
            Duration::from_secs(3600),
        );

        sleep(Duration::from_millis(50)).await;

        assert!(job.is_stopped());
        assert!(!manager.has_job("ghost"));
    }

    #[tokio::test]
    async fn test_manager_start_cached_job() {
        let cache = test_cache();
        let manager = RefreshJobManager::new(&CancellationToken::new());

        let result = manager.start_cached_job("session-1", &cache);
        assert!(matches!(result, Err(Error::NoGenerator)));

        cache.set_graph_generator(Arc::new(CountingGenerator::new(5)));
        let result = manager.start_cached_job("session-1", &cache);
        assert!(matches!(result, Err(Error::NotFound(_))));

        seed(&cache, "session-1");
        let job = manager.start_cached_job("session-1", &cache).unwrap();
        assert_eq!(job.refresh_interval(), Duration::from_secs(30));
        assert!(manager.has_job("session-1"));

        manager.stop_all();
    }

    #[tokio::test]
    async fn test_manager_start_cached_job_disabled() {
        let cache: SessionGraphCache<TestGraph> = SessionGraphCache::new(GraphCacheConfig::default());
        let manager = RefreshJobManager::new(&CancellationToken::new());

        let result = manager.start_cached_job("session-1", &cache);
        assert!(matches!(result, Err(Error::Disabled)));
    }

    #[tokio::test]
    async fn test_manager_update_interval() {
        let cache = test_cache();
        seed(&cache, "session-1");
        let manager = RefreshJobManager::new(&CancellationToken::new());
        manager.start_job(
            "session-1",
            test_options(),
            &cache,
            Arc::new(CountingGenerator::new(5)),
            Duration::from_secs(3600),
        );

        manager
            .update_interval("session-1", Duration::from_secs(10))
            .unwrap();
        assert_eq!(
            manager.get_job("session-1").unwrap().refresh_interval(),
            Duration::from_secs(10)
        );

        let missing = manager.update_interval("nope", Duration::from_secs(10));
        assert!(matches!(missing, Err(Error::NotFound(_))));

        manager.stop_all();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_manager_concurrent_access() {
        let cache = test_cache();
        let manager = Arc::new(RefreshJobManager::new(&CancellationToken::new()));
        for i in 0..10 {
            seed(&cache, &format!("session-{i}"));
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let manager = Arc::clone(&manager);
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("session-{i}");
                manager.start_job(
                    &id,
                    test_options(),
                    &cache,
                    Arc::new(CountingGenerator::new(5)),
                    Duration::from_secs(3600),
                );
                let _ = manager.has_job(&id);
                let _ = manager.active_job_count();
                if i % 2 == 0 {
                    manager.stop_job(&id);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(manager.active_job_count(), 5);
        for i in 0..10 {
            assert_eq!(manager.has_job(&format!("session-{i}")), i % 2 == 1);
        }

        manager.stop_all();
    }
}
