//! Dedicated loop that claims due jobs and feeds them to the worker pool.
//!
//! Each iteration sizes its claim from the pool's free capacity, so the
//! fetcher never takes more work than can start right away. Sleeping is a
//! timed wait on a monitor that [`PendingJobsFetcher::job_was_added`] and
//! [`PendingJobsFetcher::stop`] can cut short.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::core::handle::{panic_message, JobContext, JobHandle};
use crate::core::job::{ClaimRequest, JobGroup, JobRepository};
use crate::core::worker_pool::WorkerPool;
use crate::core::{RepositoryError, SchedulerError};
use crate::util::clock::{duration_from_ms, Clock};

/// Fetch timings that may change while the executor is running.
#[derive(Debug)]
pub struct FetchSettings {
    poll_interval_ms: AtomicU64,
    busy_interval_ms: AtomicU64,
    max_lock_duration_ms: AtomicU64,
    lock_owner: String,
}

impl FetchSettings {
    /// Create settings for claims made under `lock_owner`.
    pub fn new(
        poll_interval: Duration,
        busy_interval: Duration,
        max_lock_duration: Duration,
        lock_owner: impl Into<String>,
    ) -> Self {
        Self {
            poll_interval_ms: AtomicU64::new(as_ms(poll_interval)),
            busy_interval_ms: AtomicU64::new(as_ms(busy_interval)),
            max_lock_duration_ms: AtomicU64::new(as_ms(max_lock_duration)),
            lock_owner: lock_owner.into(),
        }
    }

    /// Default wait between fetches when idle.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::Relaxed))
    }

    /// Wait between fetches while the pool is saturated.
    pub fn busy_interval(&self) -> Duration {
        Duration::from_millis(self.busy_interval_ms.load(Ordering::Relaxed))
    }

    /// How long a claim stays valid.
    pub fn max_lock_duration(&self) -> Duration {
        Duration::from_millis(self.max_lock_duration_ms.load(Ordering::Relaxed))
    }

    /// Owner recorded on every claim.
    pub fn lock_owner(&self) -> &str {
        &self.lock_owner
    }

    /// Change the idle poll interval; takes effect on the next wait.
    pub fn set_poll_interval(&self, interval: Duration) {
        self.poll_interval_ms.store(as_ms(interval), Ordering::Relaxed);
    }

    /// Change the saturated poll interval; takes effect on the next wait.
    pub fn set_busy_interval(&self, interval: Duration) {
        self.busy_interval_ms.store(as_ms(interval), Ordering::Relaxed);
    }

    /// Change the claim duration; takes effect on the next claim.
    pub fn set_max_lock_duration(&self, duration: Duration) {
        self.max_lock_duration_ms.store(as_ms(duration), Ordering::Relaxed);
    }
}

fn as_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct WakeState {
    job_added: bool,
    shutdown: bool,
}

/// Monitor shared by the fetch loop and everyone who may wake it.
///
/// Flags are only read and written under the same lock the waiter sleeps on,
/// so a notification between clearing `job_added` and starting to wait is
/// never lost.
#[derive(Debug, Default)]
struct WakeSignal {
    state: Mutex<WakeState>,
    cond: Condvar,
}

impl WakeSignal {
    fn job_added(&self) {
        self.state.lock().job_added = true;
        self.cond.notify_all();
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.cond.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn clear_job_added(&self) {
        self.state.lock().job_added = false;
    }

    fn was_job_added(&self) -> bool {
        self.state.lock().job_added
    }

    /// Block up to `timeout`. Shutdown always ends the wait early; a new-work
    /// hint only does when `interruptible_by_new_work` is set.
    fn wait(&self, timeout: Duration, interruptible_by_new_work: bool) {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.shutdown && !(interruptible_by_new_work && state.job_added) {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }
}

/// What the loop does after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pause {
    /// Fetch again right away.
    None,
    /// Sleep, waking early on a new-work hint.
    Idle(Duration),
    /// Sleep while saturated, waking early on a new-work hint.
    Busy(Duration),
    /// Back off after a failed fetch; only shutdown wakes early.
    Backoff(Duration),
}

/// Next error wait after `current`: doubled, saturating instead of wrapping.
#[must_use]
pub fn next_backoff(current: Duration) -> Duration {
    let doubled = as_ms(current).saturating_mul(2);
    Duration::from_millis(doubled)
}

/// State owned by the fetch thread.
pub(crate) struct FetchLoop {
    repository: Arc<dyn JobRepository>,
    pool: Arc<WorkerPool>,
    context: Arc<JobContext>,
    settings: Arc<FetchSettings>,
    clock: Arc<dyn Clock>,
    signal: Arc<WakeSignal>,
    /// Current error wait; `None` until the first failure after a success.
    backoff: Option<Duration>,
}

impl FetchLoop {
    fn run(mut self) {
        info!(lock_owner = %self.settings.lock_owner(), "Pending jobs fetcher started");
        while !self.signal.is_shutdown() {
            match self.iterate() {
                Pause::None => {}
                Pause::Idle(wait) | Pause::Busy(wait) => self.signal.wait(wait, true),
                Pause::Backoff(wait) => self.signal.wait(wait, false),
            }
        }
        info!("Pending jobs fetcher stopped");
    }

    /// One claim-and-submit cycle, returning how long to pause afterwards.
    ///
    /// A panicking repository is treated like a failed fetch.
    pub(crate) fn iterate(&mut self) -> Pause {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.fetch_and_submit()))
            .unwrap_or_else(|panic| {
                Err(RepositoryError::Backend(format!(
                    "fetch panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        match outcome {
            Ok(pause) => {
                self.backoff = None;
                pause
            }
            Err(e) => {
                let wait = self.backoff.unwrap_or_else(|| self.settings.poll_interval());
                error!(error = %e, wait_ms = wait.as_millis(), "Failed to fetch pending jobs");
                self.backoff = Some(next_backoff(wait));
                Pause::Backoff(wait)
            }
        }
    }

    fn fetch_and_submit(&self) -> Result<Pause, RepositoryError> {
        // Consumed before the slot check so a pending hint cannot spin a busy wait.
        self.signal.clear_job_added();
        let limit = self.pool.available_job_slots();
        if limit == 0 {
            debug!("No free job slots, skipping fetch");
            return Ok(Pause::Busy(self.settings.busy_interval()));
        }

        let now = self.clock.now_ms();
        let lock_duration = self.settings.max_lock_duration().as_millis();
        let acquired = self.repository.find_pending_jobs(&ClaimRequest {
            limit,
            lock_owner: self.settings.lock_owner().to_string(),
            now_ms: now,
            lock_expires_at_ms: now.saturating_add(lock_duration),
        })?;

        let claimed = acquired.len();
        if claimed > 0 {
            debug!(groups = claimed, jobs = acquired.job_count(), limit = limit, "Submitting claimed jobs");
        }
        for group in acquired {
            let handle = match group {
                JobGroup::Single(id) => JobHandle::single(id, Arc::clone(&self.context)),
                JobGroup::Ordered(ids) => JobHandle::ordered(ids, Arc::clone(&self.context)),
            };
            self.pool.execute(handle);
        }

        if claimed >= limit {
            return Ok(Pause::Busy(self.settings.busy_interval()));
        }
        if self.signal.was_job_added() {
            return Ok(Pause::None);
        }

        let idle = self.settings.poll_interval();
        let now = self.clock.now_ms();
        let wait = match self.repository.next_due_at(now)? {
            Some(due) => idle.min(duration_from_ms(due.saturating_sub(now))),
            None => idle,
        };
        // A due job that was not claimed is held elsewhere; avoid spinning on it.
        if wait.is_zero() && claimed == 0 {
            return Ok(Pause::Busy(self.settings.busy_interval()));
        }
        if wait.is_zero() {
            return Ok(Pause::None);
        }
        Ok(Pause::Idle(wait))
    }
}

/// Handle to the running fetch thread.
pub struct PendingJobsFetcher {
    signal: Arc<WakeSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PendingJobsFetcher {
    /// Spawn the fetch thread.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Spawn` if the thread cannot be started.
    pub fn start(
        repository: Arc<dyn JobRepository>,
        pool: Arc<WorkerPool>,
        context: Arc<JobContext>,
        settings: Arc<FetchSettings>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        let signal = Arc::new(WakeSignal::default());
        let fetch_loop = FetchLoop {
            repository,
            pool,
            context,
            settings,
            clock,
            signal: Arc::clone(&signal),
            backoff: None,
        };

        let thread = thread::Builder::new()
            .name("job-fetcher".into())
            .spawn(move || fetch_loop.run())?;

        Ok(Self {
            signal,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Hint that new work exists; an idle wait ends at once.
    pub fn job_was_added(&self) {
        self.signal.job_added();
    }

    /// Ask the loop to exit at its next check.
    pub fn stop(&self) {
        self.signal.shutdown();
    }

    /// Block until the fetch thread has exited. Later calls return at once.
    pub fn join(&self) {
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Pending jobs fetcher thread panicked");
            }
        }
    }

    /// True once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.signal.is_shutdown()
    }
}

impl std::fmt::Debug for PendingJobsFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingJobsFetcher")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPoolConfig;
    use crate::core::executor::{Command, CommandContext, CommandExecutor, EngineHandle};
    use crate::core::history::HistoryRing;
    use crate::core::job::{AcquiredJobs, Job, JobId};
    use crate::core::worker_pool::Rejection;
    use crate::core::JobError;
    use crate::infra::repository::memory::InMemoryJobRepository;
    use crate::util::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Noop;

    #[async_trait]
    impl CommandExecutor for Noop {
        async fn execute(&self, command: &dyn Command, engine: &EngineHandle) -> Result<(), JobError> {
            command.execute(&CommandContext::begin(engine.clone())).await
        }

        async fn run_job(&self, _job: &Job, _ctx: &CommandContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    /// Repository whose claims fail a set number of times.
    struct Flaky {
        inner: InMemoryJobRepository,
        failures_left: AtomicUsize,
        limits: Mutex<Vec<usize>>,
    }

    impl JobRepository for Flaky {
        fn find_job(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
            self.inner.find_job(id)
        }

        fn find_pending_jobs(&self, request: &ClaimRequest) -> Result<AcquiredJobs, RepositoryError> {
            self.limits.lock().push(request.limit);
            let failing = self
                .failures_left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RepositoryError::Unavailable("connection refused".into()));
            }
            self.inner.find_pending_jobs(request)
        }

        fn release(&self, ids: &[JobId], lock_owner: &str) -> Result<(), RepositoryError> {
            self.inner.release(ids, lock_owner)
        }

        fn delete_job(&self, id: JobId) -> Result<(), RepositoryError> {
            self.inner.delete_job(id)
        }

        fn next_due_at(&self, now_ms: u128) -> Result<Option<u128>, RepositoryError> {
            self.inner.next_due_at(now_ms)
        }
    }

    const POLL: Duration = Duration::from_millis(1_000);
    const BUSY: Duration = Duration::from_millis(100);

    fn setup(failures: usize, workers: usize, queue: usize) -> (FetchLoop, Arc<Flaky>, Arc<ManualClock>) {
        let repository = Arc::new(Flaky {
            inner: InMemoryJobRepository::new(),
            failures_left: AtomicUsize::new(failures),
            limits: Mutex::new(Vec::new()),
        });
        let clock = Arc::new(ManualClock::new(10_000));
        let context = Arc::new(JobContext {
            repository: repository.clone(),
            commands: Arc::new(Noop),
            engine: EngineHandle::new("fetch-test"),
            history: Arc::new(HistoryRing::new(16)),
            clock: clock.clone(),
        });
        let pool = WorkerPool::new(
            WorkerPoolConfig::new()
                .with_worker_count(workers)
                .with_queue_capacity(queue),
            |_: JobHandle, _: Rejection| {},
            clock.clone(),
        )
        .unwrap();
        let fetch_loop = FetchLoop {
            repository: repository.clone(),
            pool: Arc::new(pool),
            context,
            settings: Arc::new(FetchSettings::new(POLL, BUSY, Duration::from_secs(300), "node-a")),
            clock: clock.clone(),
            signal: Arc::new(WakeSignal::default()),
            backoff: None,
        };
        (fetch_loop, repository, clock)
    }

    #[test]
    fn backoff_doubles_without_cap() {
        assert_eq!(next_backoff(Duration::from_millis(250)), Duration::from_millis(500));
        assert_eq!(
            next_backoff(Duration::from_millis(u64::MAX)),
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn repeated_failures_back_off_exponentially_then_reset() {
        let (mut fetch_loop, _repo, _clock) = setup(3, 2, 2);

        assert_eq!(fetch_loop.iterate(), Pause::Backoff(POLL));
        assert_eq!(fetch_loop.iterate(), Pause::Backoff(POLL * 2));
        assert_eq!(fetch_loop.iterate(), Pause::Backoff(POLL * 4));

        // Success resets; an empty repository means a full idle wait.
        assert_eq!(fetch_loop.iterate(), Pause::Idle(POLL));
        assert!(fetch_loop.backoff.is_none());
    }

    #[test]
    fn claim_limit_follows_free_slots() {
        let (mut fetch_loop, repo, _clock) = setup(0, 3, 2);
        fetch_loop.iterate();
        assert_eq!(*repo.limits.lock(), vec![5]);
    }

    #[test]
    fn saturated_claim_uses_busy_interval() {
        let (mut fetch_loop, repo, _clock) = setup(0, 1, 1);
        for _ in 0..5 {
            repo.inner.insert(Job::new("timer", 0));
        }
        assert_eq!(fetch_loop.iterate(), Pause::Busy(BUSY));

        // A hint is consumed by the next cycle, so a busy wait cannot spin on it.
        fetch_loop.signal.job_added();
        fetch_loop.iterate();
        assert!(!fetch_loop.signal.was_job_added());
        fetch_loop.pool.shutdown();
        assert!(fetch_loop.pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn waits_until_next_due_job_when_sooner_than_poll() {
        let (mut fetch_loop, repo, clock) = setup(0, 2, 2);
        repo.inner.insert(Job::new("timer", clock.now_ms() + 300));
        assert_eq!(fetch_loop.iterate(), Pause::Idle(Duration::from_millis(300)));

        repo.inner.insert(Job::new("timer", clock.now_ms() + 60_000));
        clock.advance(Duration::from_millis(100));
        assert_eq!(fetch_loop.iterate(), Pause::Idle(Duration::from_millis(200)));
    }

    #[test]
    fn new_work_hint_skips_the_wait() {
        let (mut fetch_loop, _repo, _clock) = setup(0, 2, 2);
        // A hint that lands after the claim started is kept for the decision.
        let signal = Arc::clone(&fetch_loop.signal);
        let repository = Arc::clone(&fetch_loop.repository);
        fetch_loop.repository = Arc::new(HintOnClaim { inner: repository, signal });
        assert_eq!(fetch_loop.iterate(), Pause::None);
    }

    /// Repository whose first claim panics.
    struct PanicsOnce {
        inner: InMemoryJobRepository,
        panicked: std::sync::atomic::AtomicBool,
    }

    impl JobRepository for PanicsOnce {
        fn find_job(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
            self.inner.find_job(id)
        }

        fn find_pending_jobs(&self, request: &ClaimRequest) -> Result<AcquiredJobs, RepositoryError> {
            if !self.panicked.swap(true, Ordering::AcqRel) {
                panic!("driver crashed");
            }
            self.inner.find_pending_jobs(request)
        }

        fn release(&self, ids: &[JobId], lock_owner: &str) -> Result<(), RepositoryError> {
            self.inner.release(ids, lock_owner)
        }

        fn delete_job(&self, id: JobId) -> Result<(), RepositoryError> {
            self.inner.delete_job(id)
        }
    }

    #[test]
    fn panicking_claim_backs_off_and_recovers() {
        let (mut fetch_loop, _repo, _clock) = setup(0, 2, 2);
        let repository = Arc::new(PanicsOnce {
            inner: InMemoryJobRepository::new(),
            panicked: std::sync::atomic::AtomicBool::new(false),
        });
        repository.inner.insert(Job::new("timer", 0));
        fetch_loop.repository = repository.clone();

        assert_eq!(fetch_loop.iterate(), Pause::Backoff(POLL));
        assert_eq!(fetch_loop.backoff, Some(POLL * 2));

        // The next cycle claims the job and clears the backoff.
        assert!(!matches!(fetch_loop.iterate(), Pause::Backoff(_)));
        assert!(fetch_loop.backoff.is_none());
        assert_eq!(
            repository.inner.get(1).and_then(|job| job.lock_owner),
            Some("node-a".to_string())
        );
        fetch_loop.pool.shutdown();
        assert!(fetch_loop.pool.await_termination(Duration::from_secs(5)));
    }

    struct HintOnClaim {
        inner: Arc<dyn JobRepository>,
        signal: Arc<WakeSignal>,
    }

    impl JobRepository for HintOnClaim {
        fn find_job(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
            self.inner.find_job(id)
        }

        fn find_pending_jobs(&self, request: &ClaimRequest) -> Result<AcquiredJobs, RepositoryError> {
            self.signal.job_added();
            self.inner.find_pending_jobs(request)
        }

        fn release(&self, ids: &[JobId], lock_owner: &str) -> Result<(), RepositoryError> {
            self.inner.release(ids, lock_owner)
        }

        fn delete_job(&self, id: JobId) -> Result<(), RepositoryError> {
            self.inner.delete_job(id)
        }
    }

    #[test]
    fn wait_returns_early_on_hint_or_shutdown() {
        let signal = Arc::new(WakeSignal::default());
        let waker = Arc::clone(&signal);
        let started = Instant::now();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.job_added();
        });
        signal.wait(Duration::from_secs(10), true);
        assert!(started.elapsed() < Duration::from_secs(5));
        t.join().unwrap();

        // Hint does not cut a backoff wait short.
        let started = Instant::now();
        signal.wait(Duration::from_millis(100), false);
        assert!(started.elapsed() >= Duration::from_millis(100));

        // A hint set before the wait starts is not lost.
        signal.wait(Duration::from_secs(10), true);

        signal.shutdown();
        let started = Instant::now();
        signal.wait(Duration::from_secs(10), false);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
