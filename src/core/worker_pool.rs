//! Bounded worker pool running job handles on dedicated OS threads.
//!
//! The pool owns a fixed-capacity admission queue and a resizable set of
//! worker threads. Submitting never blocks: work that does not fit is passed
//! to a [`RejectionPolicy`], which the job executor binds to its give-back
//! path so the claim returns to the shared backlog.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_executor::config::WorkerPoolConfig;
//! use job_executor::core::{WorkerPool, Rejection, JobHandle};
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new().with_worker_count(4).with_queue_capacity(8),
//!     |handle: JobHandle, reason: Rejection| give_back(handle, reason),
//!     clock,
//! )?;
//! pool.execute(handle);
//! pool.shutdown();
//! pool.await_termination(Duration::from_secs(60));
//! ```

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::handle::JobHandle;
use crate::core::job::JobId;

pub use native::WorkerPool;

/// Errors that can occur when building or resizing a `WorkerPool`.
#[derive(Debug)]
pub enum PoolError {
    /// Configuration validation failed.
    InvalidConfig(String),

    /// A worker thread could not be spawned.
    Spawn(String),

    /// The pool has been shut down.
    PoolShutdown,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Spawn(msg) => write!(f, "failed to spawn worker: {msg}"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Why a handle was handed back instead of run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The admission queue was full.
    QueueFull,
    /// The pool was no longer accepting work.
    ShutDown,
    /// Immediate shutdown cancelled the handle before it finished.
    Cancelled,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => f.write_str("queue full"),
            Self::ShutDown => f.write_str("shut down"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Receives every handle the pool cannot run to completion.
///
/// Called synchronously on the submitting thread (overflow), on the thread
/// performing immediate shutdown (queued work), or on the worker that was
/// interrupted (in-flight work). Each handle is passed exactly once.
pub trait RejectionPolicy: Send + Sync + 'static {
    /// Take back `handle`.
    fn rejected(&self, handle: JobHandle, reason: Rejection);
}

impl<F> RejectionPolicy for F
where
    F: Fn(JobHandle, Rejection) + Send + Sync + 'static,
{
    fn rejected(&self, handle: JobHandle, reason: Rejection) {
        self(handle, reason);
    }
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured number of worker threads.
    pub worker_count: usize,

    /// Handles currently executing.
    pub active_tasks: u64,

    /// Handles waiting in the admission queue.
    pub queued_tasks: u64,

    /// Total handles accepted into the queue.
    pub submitted_tasks: u64,

    /// Handles that ran to completion.
    pub completed_tasks: u64,

    /// Handles interrupted by immediate shutdown.
    pub cancelled_tasks: u64,

    /// Handles refused at admission.
    pub rejected_tasks: u64,

    /// Handles passed to the rejection policy for any reason.
    pub handed_back: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub queued_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub cancelled_tasks: AtomicU64,
    pub rejected_tasks: AtomicU64,
    pub handed_back: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            cancelled_tasks: self.cancelled_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
            handed_back: self.handed_back.load(Ordering::Relaxed),
        }
    }
}

/// A handle currently executing on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Worker running the handle.
    pub worker_id: usize,
    /// Ids bound to the handle.
    pub job_ids: Vec<JobId>,
    /// When the worker picked the handle up (ms since epoch).
    pub started_at_ms: u128,
}
