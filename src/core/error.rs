//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::job::JobId;
use crate::core::worker_pool::PoolError;

/// Errors produced by the job executor lifecycle and configuration.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Operation is not allowed in the executor's current state.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The worker pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A dedicated thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures reported by a job repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backing store could not be reached.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failure of a single job execution attempt.
#[derive(Debug, Error)]
pub enum JobError {
    /// The claimed id no longer resolves to a job record.
    #[error("job {0} not found")]
    NotFound(JobId),
    /// No handler is registered for the job's type.
    #[error("no handler registered for job type `{0}`")]
    NoHandler(String),
    /// The job's business logic failed.
    #[error("job {job_id} failed: {source}")]
    Failed {
        /// Job that failed.
        job_id: JobId,
        /// Error raised by the handler.
        #[source]
        source: anyhow::Error,
    },
    /// The job's business logic panicked.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The repository failed while the job was running.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors from reading the execution history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// The requested entry is older than anything retained.
    #[error("history index {index} out of range (size {size})")]
    OutOfRange {
        /// Requested distance from the latest entry.
        index: usize,
        /// Number of entries retained when the check ran.
        size: usize,
    },
}

/// Application-facing result using anyhow for job business logic.
pub type AppResult<T> = Result<T, anyhow::Error>;
