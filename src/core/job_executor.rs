//! Scheduler lifecycle tying the fetcher, worker pool and history together.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use job_executor::config::ExecutorConfig;
//! use job_executor::core::{EngineHandle, JobExecutor};
//! use job_executor::infra::{InMemoryJobRepository, LocalCommandExecutor};
//!
//! let repository = Arc::new(InMemoryJobRepository::new());
//! let commands = Arc::new(LocalCommandExecutor::new(repository.clone()));
//! let executor = JobExecutor::new(ExecutorConfig::new().with_worker_count(4))?
//!     .with_repository(repository)
//!     .with_command_executor(commands)
//!     .with_engine(EngineHandle::new("default"));
//!
//! executor.start()?;
//! executor.job_was_added();
//! executor.shutdown_graceful(true);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::core::executor::{CommandExecutor, EngineHandle};
use crate::core::fetcher::{FetchSettings, PendingJobsFetcher};
use crate::core::handle::{JobContext, JobHandle};
use crate::core::history::HistoryRing;
use crate::core::job::{JobGroup, JobId, JobRepository};
use crate::core::worker_pool::{InFlight, PoolStats, Rejection, RejectionPolicy, WorkerPool};
use crate::core::SchedulerError;
use crate::util::clock::{Clock, SystemClock};

/// Clears claims this scheduler instance could not honour.
struct ClaimRelease {
    repository: Arc<dyn JobRepository>,
    lock_owner: String,
}

impl ClaimRelease {
    fn release(&self, ids: &[JobId]) {
        if ids.is_empty() {
            return;
        }
        match self.repository.release(ids, &self.lock_owner) {
            Ok(()) => debug!(job_ids = ?ids, "Claims released"),
            // The job stays claimed until its lock expires.
            Err(e) => error!(job_ids = ?ids, error = %e, "Failed to release claims"),
        }
    }
}

impl RejectionPolicy for ClaimRelease {
    fn rejected(&self, handle: JobHandle, reason: Rejection) {
        debug!(reason = %reason, "Giving job back");
        self.release(handle.pending_ids());
    }
}

/// Pieces of one active period.
struct Run {
    context: Arc<JobContext>,
    pool: Arc<WorkerPool>,
    fetcher: Arc<PendingJobsFetcher>,
}

/// Background job scheduler.
///
/// Inactive until [`start`](Self::start); back to inactive after either
/// shutdown. History and statistics of the most recent run stay readable
/// after shutdown.
pub struct JobExecutor {
    config: RwLock<ExecutorConfig>,
    repository: Option<Arc<dyn JobRepository>>,
    commands: Option<Arc<dyn CommandExecutor>>,
    engine: Option<EngineHandle>,
    clock: Arc<dyn Clock>,
    settings: Arc<FetchSettings>,
    run: Mutex<Option<Run>>,
    active: AtomicBool,
}

impl JobExecutor {
    /// Create an inactive executor.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if `config` fails validation.
    pub fn new(config: ExecutorConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let settings = Arc::new(FetchSettings::new(
            config.poll_interval(),
            config.busy_interval(),
            config.max_lock_duration(),
            config.lock_owner.clone(),
        ));
        Ok(Self {
            config: RwLock::new(config),
            repository: None,
            commands: None,
            engine: None,
            clock: Arc::new(SystemClock),
            settings,
            run: Mutex::new(None),
            active: AtomicBool::new(false),
        })
    }

    /// Set the repository jobs are claimed from.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Set the command-execution façade jobs run through.
    #[must_use]
    pub fn with_command_executor(mut self, commands: Arc<dyn CommandExecutor>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Set the engine handle passed to the façade.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineHandle) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the worker pool and the fetcher. A no-op if already active.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::IllegalState` if the repository, façade or
    /// engine handle is missing, or a pool/spawn error if threads cannot be
    /// started.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut run = self.run.lock();
        if self.active.load(Ordering::Acquire) {
            info!("Job executor already active");
            return Ok(());
        }

        let repository = self
            .repository
            .clone()
            .ok_or_else(|| SchedulerError::IllegalState("no job repository configured".into()))?;
        let commands = self
            .commands
            .clone()
            .ok_or_else(|| SchedulerError::IllegalState("no command executor configured".into()))?;
        let engine = self
            .engine
            .clone()
            .ok_or_else(|| SchedulerError::IllegalState("no engine handle configured".into()))?;

        let config = self.config.read().clone();
        let context = Arc::new(JobContext {
            repository: Arc::clone(&repository),
            commands,
            engine,
            history: Arc::new(HistoryRing::new(config.history_capacity)),
            clock: Arc::clone(&self.clock),
        });
        let pool = Arc::new(WorkerPool::new(
            config.pool_config(),
            ClaimRelease {
                repository: Arc::clone(&repository),
                lock_owner: self.settings.lock_owner().to_string(),
            },
            Arc::clone(&self.clock),
        )?);
        let fetcher = match PendingJobsFetcher::start(
            repository,
            Arc::clone(&pool),
            Arc::clone(&context),
            Arc::clone(&self.settings),
            Arc::clone(&self.clock),
        ) {
            Ok(fetcher) => fetcher,
            Err(e) => {
                pool.shutdown_now();
                return Err(e);
            }
        };

        *run = Some(Run {
            context,
            pool,
            fetcher: Arc::new(fetcher),
        });
        self.active.store(true, Ordering::Release);

        info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            history_capacity = config.history_capacity,
            lock_owner = %self.settings.lock_owner(),
            "Job executor started"
        );
        Ok(())
    }

    /// Flip to inactive, returning the pieces to stop. `None` if already inactive.
    fn deactivate(&self) -> Option<(Arc<WorkerPool>, Arc<PendingJobsFetcher>)> {
        let run = self.run.lock();
        if !self.active.swap(false, Ordering::AcqRel) {
            return None;
        }
        run.as_ref()
            .map(|r| (Arc::clone(&r.pool), Arc::clone(&r.fetcher)))
    }

    /// Stop fetching and let queued and running jobs finish.
    ///
    /// With `wait`, blocks until the fetcher has exited and the pool drained,
    /// giving up on the pool after the configured shutdown timeout. A no-op
    /// if already inactive.
    pub fn shutdown_graceful(&self, wait: bool) {
        let Some((pool, fetcher)) = self.deactivate() else {
            debug!("Job executor not active, ignoring graceful shutdown");
            return;
        };
        info!(wait = wait, "Shutting down job executor");

        fetcher.stop();
        pool.shutdown();
        if wait {
            fetcher.join();
            pool.await_termination(self.shutdown_timeout());
        }
    }

    /// Stop fetching, cancel queued and running jobs and give every one back.
    ///
    /// With `wait`, blocks until the fetcher and all workers have exited,
    /// bounded by the configured shutdown timeout. A no-op if already inactive.
    pub fn shutdown_immediate(&self, wait: bool) {
        let Some((pool, fetcher)) = self.deactivate() else {
            debug!("Job executor not active, ignoring immediate shutdown");
            return;
        };
        info!(wait = wait, "Shutting down job executor immediately");

        fetcher.stop();
        let drained = pool.shutdown_now();
        debug!(handed_back = drained, "Queued jobs given back");
        if wait {
            fetcher.join();
            pool.await_termination(self.shutdown_timeout());
        }
    }

    /// True between a successful start and the next shutdown.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn active_pool(&self) -> Option<Arc<WorkerPool>> {
        if !self.is_active() {
            return None;
        }
        self.run.lock().as_ref().map(|r| Arc::clone(&r.pool))
    }

    /// Approximate number of idle worker threads; `0` when inactive.
    #[must_use]
    pub fn approx_available_threads(&self) -> usize {
        self.active_pool().map_or(0, |pool| pool.available_threads())
    }

    /// Handles that could start or queue right now; `0` when inactive.
    #[must_use]
    pub fn available_job_slots(&self) -> usize {
        self.active_pool().map_or(0, |pool| pool.available_job_slots())
    }

    /// Hint that new jobs were persisted, cutting the fetcher's idle wait short.
    pub fn job_was_added(&self) {
        if !self.is_active() {
            return;
        }
        if let Some(run) = self.run.lock().as_ref() {
            run.fetcher.job_was_added();
        }
    }

    /// Submit a claimed group for execution.
    ///
    /// Work that cannot be accepted, including everything submitted while
    /// inactive, is given back.
    pub fn execute(&self, group: JobGroup) {
        let target = self
            .run
            .lock()
            .as_ref()
            .map(|r| (Arc::clone(&r.pool), Arc::clone(&r.context)));

        match target {
            Some((pool, context)) => {
                let handle = match group {
                    JobGroup::Single(id) => JobHandle::single(id, context),
                    JobGroup::Ordered(ids) => JobHandle::ordered(ids, context),
                };
                pool.execute(handle);
            }
            None => {
                warn!(job_ids = ?group.ids(), "Job executor not active, giving jobs back");
                self.release(group.ids());
            }
        }
    }

    /// Release the claims on every unfinished job of `handle`.
    pub fn give_back(&self, handle: &JobHandle) {
        self.release(handle.pending_ids());
    }

    fn release(&self, ids: &[JobId]) {
        if let Some(repository) = &self.repository {
            ClaimRelease {
                repository: Arc::clone(repository),
                lock_owner: self.settings.lock_owner().to_string(),
            }
            .release(ids);
        }
    }

    /// History of the current or most recent run.
    #[must_use]
    pub fn history(&self) -> Option<Arc<HistoryRing>> {
        self.run.lock().as_ref().map(|r| Arc::clone(&r.context.history))
    }

    /// Pool statistics of the current or most recent run.
    #[must_use]
    pub fn stats(&self) -> Option<PoolStats> {
        self.run.lock().as_ref().map(|r| r.pool.stats())
    }

    /// Handles that have been running longer than the claim duration.
    ///
    /// Their claims may already have lapsed, so another scheduler could pick
    /// the same jobs up.
    #[must_use]
    pub fn stalled_jobs(&self) -> Vec<InFlight> {
        let Some(pool) = self.active_pool() else {
            return Vec::new();
        };
        let now = self.clock.now_ms();
        let limit = self.settings.max_lock_duration().as_millis();
        pool.in_flight()
            .into_iter()
            .filter(|f| now.saturating_sub(f.started_at_ms) > limit)
            .collect()
    }

    /// Owner recorded on claims made by this executor.
    #[must_use]
    pub fn lock_owner(&self) -> &str {
        self.settings.lock_owner()
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> ExecutorConfig {
        self.config.read().clone()
    }

    fn shutdown_timeout(&self) -> Duration {
        self.config.read().shutdown_timeout()
    }

    /// Change the worker count; applied live when active.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for zero, or a pool error if
    /// the running pool cannot be resized.
    pub fn set_worker_count(&self, worker_count: usize) -> Result<(), SchedulerError> {
        if worker_count == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker_count must be greater than 0".into(),
            ));
        }
        let run = self.run.lock();
        if self.is_active() {
            if let Some(run) = run.as_ref() {
                run.pool.set_worker_count(worker_count)?;
            }
        }
        self.config.write().worker_count = worker_count;
        Ok(())
    }

    /// Change the admission queue capacity.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::IllegalState` while active, or
    /// `SchedulerError::InvalidConfig` for zero.
    pub fn set_queue_capacity(&self, queue_capacity: usize) -> Result<(), SchedulerError> {
        let _run = self.run.lock();
        if self.is_active() {
            return Err(SchedulerError::IllegalState(
                "queue capacity cannot change while the executor is active".into(),
            ));
        }
        if queue_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "queue_capacity must be greater than 0".into(),
            ));
        }
        self.config.write().queue_capacity = queue_capacity;
        Ok(())
    }

    /// Change the history capacity.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::IllegalState` while active, or
    /// `SchedulerError::InvalidConfig` for zero.
    pub fn set_history_capacity(&self, history_capacity: usize) -> Result<(), SchedulerError> {
        let _run = self.run.lock();
        if self.is_active() {
            return Err(SchedulerError::IllegalState(
                "history capacity cannot change while the executor is active".into(),
            ));
        }
        if history_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "history_capacity must be greater than 0".into(),
            ));
        }
        self.config.write().history_capacity = history_capacity;
        Ok(())
    }

    /// Change the idle poll interval; applied live.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for zero.
    pub fn set_poll_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        non_zero("poll_interval", interval)?;
        self.settings.set_poll_interval(interval);
        self.config.write().poll_interval_ms = as_ms(interval);
        Ok(())
    }

    /// Change the saturated poll interval; applied live.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for zero.
    pub fn set_busy_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        non_zero("busy_interval", interval)?;
        self.settings.set_busy_interval(interval);
        self.config.write().busy_interval_ms = as_ms(interval);
        Ok(())
    }

    /// Change the claim duration; applied from the next claim on.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for zero.
    pub fn set_max_lock_duration(&self, duration: Duration) -> Result<(), SchedulerError> {
        non_zero("max_lock_duration", duration)?;
        self.settings.set_max_lock_duration(duration);
        self.config.write().max_lock_duration_ms = as_ms(duration);
        Ok(())
    }
}

fn as_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn non_zero(name: &str, value: Duration) -> Result<(), SchedulerError> {
    if value.is_zero() {
        return Err(SchedulerError::InvalidConfig(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(())
}

impl Drop for JobExecutor {
    fn drop(&mut self) {
        if self.is_active() {
            debug!("JobExecutor dropped while active - shutting down without waiting");
            self.shutdown_graceful(false);
        }
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("active", &self.is_active())
            .field("lock_owner", &self.lock_owner())
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}
