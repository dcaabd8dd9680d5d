//! Native implementation of `WorkerPool` using OS threads.
//!
//! Each worker thread drives its own single-threaded tokio runtime, so the
//! async command façade runs without touching any shared runtime.
//!
//! # Design Principles
//!
//! - **No polling**: Workers block on channel recv; shutdown waits on a Condvar
//! - **Never block the submitter**: Admission is `try_send`; overflow is handed back
//! - **Natural shrink**: Retirement tokens are picked up by idle workers first,
//!   busy workers only after their current handle
//! - **Clean shutdown**: Dropping the sender unblocks workers once the queue drains

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::handle::JobHandle;
use crate::util::clock::Clock;

use super::{InFlight, PoolCounters, PoolError, PoolStats, Rejection, RejectionPolicy};

/// State shared between the pool and its worker threads.
struct WorkerShared {
    counters: PoolCounters,
    rejection: Box<dyn RejectionPolicy>,
    cancel: CancellationToken,
    in_flight: Mutex<HashMap<usize, InFlight>>,
    clock: Arc<dyn Clock>,
    retire_tx: Sender<()>,
    /// Number of worker threads that have not exited yet.
    live: Mutex<usize>,
    exited: Condvar,
}

impl WorkerShared {
    fn hand_back(&self, handle: JobHandle, reason: Rejection) {
        self.counters.handed_back.fetch_add(1, Ordering::Relaxed);
        warn!(job_ids = ?handle.pending_ids(), reason = %reason, "Handing job back");
        self.rejection.rejected(handle, reason);
    }

    fn leave(&self) {
        let mut live = self.live.lock();
        *live = live.saturating_sub(1);
        self.exited.notify_all();
    }

    /// Run one handle, racing it against immediate shutdown.
    fn run_handle(&self, worker_id: usize, handle: JobHandle, rt: &tokio::runtime::Runtime) {
        self.counters.active_tasks.fetch_add(1, Ordering::Relaxed);
        self.in_flight.lock().insert(
            worker_id,
            InFlight {
                worker_id,
                job_ids: handle.job_ids().to_vec(),
                started_at_ms: self.clock.now_ms(),
            },
        );

        debug!(worker_id = worker_id, job_ids = ?handle.job_ids(), "Worker executing handle");

        let finished = rt.block_on(async {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => false,
                () = handle.run() => true,
            }
        });

        self.in_flight.lock().remove(&worker_id);
        self.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);

        if finished {
            self.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            debug!(worker_id = worker_id, "Worker completed handle");
        } else if let Some(rest) = handle.into_unfinished() {
            self.counters.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
            self.hand_back(rest, Rejection::Cancelled);
        }
    }
}

/// Worker pool with dedicated OS threads and a bounded admission queue.
///
/// # Design
///
/// - **Bounded admission**: at most `queue_capacity` handles wait for a worker
/// - **Overflow hand-back**: the rejection policy receives what does not fit
/// - **Live resize**: growing spawns threads at once, shrinking retires them
///   as they become idle
pub struct WorkerPool {
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Worker count currently requested.
    target_workers: AtomicUsize,

    /// Task sender (to workers). Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<JobHandle>>>,

    /// Kept to drain queued handles on immediate shutdown and to hand
    /// receivers to workers spawned by a resize.
    task_rx: Receiver<JobHandle>,

    /// Retirement tokens not yet consumed can be reclaimed on a later grow.
    retire_rx: Receiver<()>,

    shared: Arc<WorkerShared>,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    next_worker_id: AtomicUsize,

    /// Shutdown flag (lock-free atomic).
    shutdown: AtomicBool,
}

impl WorkerPool {
    /// Create a pool and spawn `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid, or
    /// `PoolError::Spawn` if a worker thread cannot be started.
    pub fn new(
        config: WorkerPoolConfig,
        rejection: impl RejectionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = bounded::<JobHandle>(config.queue_capacity);
        let (retire_tx, retire_rx) = unbounded::<()>();

        let shared = Arc::new(WorkerShared {
            counters: PoolCounters::default(),
            rejection: Box::new(rejection),
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
            clock,
            retire_tx,
            live: Mutex::new(0),
            exited: Condvar::new(),
        });

        let pool = Self {
            target_workers: AtomicUsize::new(config.worker_count),
            task_tx: Mutex::new(Some(task_tx)),
            task_rx,
            retire_rx,
            shared,
            workers: Mutex::new(Vec::with_capacity(config.worker_count)),
            next_worker_id: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            config,
        };

        {
            let mut workers = pool.workers.lock();
            for _ in 0..pool.config.worker_count {
                workers.push(pool.spawn_worker()?);
            }
        }

        info!(
            worker_count = pool.config.worker_count,
            queue_capacity = pool.config.queue_capacity,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(pool)
    }

    /// Submit a handle for execution. Never blocks.
    ///
    /// If the queue is full or the pool is shut down, the handle goes to the
    /// rejection policy on the calling thread before this returns.
    pub fn execute(&self, handle: JobHandle) {
        if self.shutdown.load(Ordering::Acquire) {
            self.shared.hand_back(handle, Rejection::ShutDown);
            return;
        }

        let counters = &self.shared.counters;
        counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
        let sent = match self.task_tx.lock().as_ref() {
            Some(task_tx) => task_tx.try_send(handle),
            None => Err(TrySendError::Disconnected(handle)),
        };

        match sent {
            Ok(()) => {
                counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(handle)) => {
                counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                warn!("Worker pool queue is full");
                self.shared.hand_back(handle, Rejection::QueueFull);
            }
            Err(TrySendError::Disconnected(handle)) => {
                counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                self.shared.hand_back(handle, Rejection::ShutDown);
            }
        }
    }

    /// Change the number of worker threads while running.
    ///
    /// Growing spawns threads immediately. Shrinking never preempts: idle
    /// workers retire first, busy ones after finishing their handle.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for a count of zero,
    /// `PoolError::PoolShutdown` after shutdown, or `PoolError::Spawn` if a
    /// new thread cannot be started.
    pub fn set_worker_count(&self, worker_count: usize) -> Result<(), PoolError> {
        if worker_count == 0 {
            return Err(PoolError::InvalidConfig(
                "worker_count must be greater than 0".into(),
            ));
        }
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let mut workers = self.workers.lock();
        // Reclaim retirements from an earlier shrink that no worker took yet.
        while self.retire_rx.try_recv().is_ok() {}

        let live = *self.shared.live.lock();
        self.target_workers.store(worker_count, Ordering::Release);
        if worker_count > live {
            for _ in live..worker_count {
                workers.push(self.spawn_worker()?);
            }
        } else {
            for _ in worker_count..live {
                let _ = self.shared.retire_tx.send(());
            }
        }
        workers.retain(|w| !w.is_finished());

        info!(from = live, to = worker_count, "Worker pool resized");
        Ok(())
    }

    /// Configured number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.target_workers.load(Ordering::Acquire)
    }

    /// Capacity of the admission queue.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    /// Approximate number of idle worker threads.
    #[must_use]
    pub fn available_threads(&self) -> usize {
        let active = usize::try_from(self.shared.counters.active_tasks.load(Ordering::Relaxed))
            .unwrap_or(usize::MAX);
        self.worker_count().saturating_sub(active)
    }

    /// Approximate number of free admission queue slots.
    #[must_use]
    pub fn remaining_queue_capacity(&self) -> usize {
        let queued = usize::try_from(self.shared.counters.queued_tasks.load(Ordering::Relaxed))
            .unwrap_or(usize::MAX);
        self.config.queue_capacity.saturating_sub(queued)
    }

    /// Handles that could be accepted right now without overflow.
    #[must_use]
    pub fn available_job_slots(&self) -> usize {
        self.available_threads() + self.remaining_queue_capacity()
    }

    /// Handles currently executing, one per busy worker.
    #[must_use]
    pub fn in_flight(&self) -> Vec<InFlight> {
        self.shared.in_flight.lock().values().cloned().collect()
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.worker_count())
    }

    /// True once either shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work; queued and running handles still finish.
    ///
    /// Returns `false` if the pool was already shut down.
    pub fn shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("Shutting down worker pool");
        // Workers drain the queue, then see the channel closed.
        self.task_tx.lock().take();
        true
    }

    /// Stop accepting work and cancel everything queued or running.
    ///
    /// Queued handles are handed back here; running handles are interrupted
    /// at their next await point and handed back by their worker. Returns
    /// the number of queued handles handed back by this call.
    pub fn shutdown_now(&self) -> usize {
        self.shutdown.store(true, Ordering::Release);
        self.task_tx.lock().take();

        let mut drained = 0;
        while let Ok(handle) = self.task_rx.try_recv() {
            self.shared.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            self.shared.counters.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
            self.shared.hand_back(handle, Rejection::Cancelled);
            drained += 1;
        }
        self.shared.cancel.cancel();

        info!(handed_back = drained, "Worker pool shut down immediately");
        drained
    }

    /// Wait up to `timeout` for every worker to exit.
    ///
    /// Workers still running after the timeout are detached. Returns `true`
    /// if all workers exited in time.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let drained = {
            let mut live = self.shared.live.lock();
            while *live > 0 {
                if self.shared.exited.wait_until(&mut live, deadline).timed_out() {
                    break;
                }
            }
            *live == 0
        };

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if !worker.is_finished() {
                warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                continue;
            }
            if worker.join().is_err() {
                warn!(worker_id = idx, "Worker panicked");
            }
        }

        if drained {
            info!(worker_count = worker_count, "Worker pool shut down complete");
        } else {
            warn!(timeout_ms = timeout.as_millis(), "Worker pool did not drain in time");
        }
        drained
    }

    /// Spawn a worker thread.
    fn spawn_worker(&self) -> Result<JoinHandle<()>, PoolError> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let task_rx = self.task_rx.clone();
        let retire_rx = self.retire_rx.clone();
        let shared = Arc::clone(&self.shared);

        *self.shared.live.lock() += 1;
        thread::Builder::new()
            .name(format!("{}-{worker_id}", self.config.thread_name_prefix))
            .stack_size(self.config.thread_stack_size)
            .spawn(move || worker_loop(worker_id, &task_rx, &retire_rx, &shared))
            .map_err(|e| {
                self.shared.leave();
                error!(worker_id = worker_id, error = %e, "Failed to spawn worker thread");
                PoolError::Spawn(e.to_string())
            })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but DON'T join workers in Drop
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.task_tx.lock().take();
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

enum Next {
    Run(JobHandle),
    Closed,
    Retire,
}

/// Marks the worker as exited when dropped, including on unwind.
struct LeaveOnExit<'a>(&'a WorkerShared);

impl Drop for LeaveOnExit<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// Body of a worker thread. `shared.leave()` runs exactly once on exit,
/// even if a rejection policy panics.
fn worker_loop(
    worker_id: usize,
    task_rx: &Receiver<JobHandle>,
    retire_rx: &Receiver<()>,
    shared: &WorkerShared,
) {
    debug!(worker_id = worker_id, "Worker thread started");
    let _leave = LeaveOnExit(shared);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id = worker_id, error = %e, "Failed to create worker runtime");
            return;
        }
    };

    loop {
        let next = select! {
            recv(task_rx) -> msg => msg.map_or(Next::Closed, Next::Run),
            recv(retire_rx) -> _ => Next::Retire,
        };
        let handle = match next {
            Next::Run(handle) => handle,
            Next::Closed => {
                debug!(worker_id = worker_id, "Worker channel closed, exiting");
                break;
            }
            Next::Retire => {
                debug!(worker_id = worker_id, "Worker retiring");
                break;
            }
        };

        shared.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);

        if shared.cancel.is_cancelled() {
            shared.counters.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
            shared.hand_back(handle, Rejection::Cancelled);
            continue;
        }

        shared.run_handle(worker_id, handle, &rt);
    }

    debug!(worker_id = worker_id, "Worker thread exiting");
}
