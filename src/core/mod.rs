//! Core scheduling abstractions: jobs, handles, history, pool, fetcher and executor.

pub mod error;
pub mod executor;
pub mod fetcher;
pub mod handle;
pub mod history;
pub mod job;
pub mod job_executor;
pub mod worker_pool;

pub use error::{AppResult, HistoryError, JobError, RepositoryError, SchedulerError};
pub use executor::{Command, CommandContext, CommandExecutor, EngineHandle};
pub use fetcher::{next_backoff, FetchSettings, PendingJobsFetcher};
pub use handle::{JobContext, JobHandle};
pub use history::{HistoryEntry, HistoryRing};
pub use job::{AcquiredJobs, ClaimRequest, Job, JobGroup, JobId, JobRepository};
pub use job_executor::JobExecutor;
pub use worker_pool::{InFlight, PoolError, PoolStats, Rejection, RejectionPolicy, WorkerPool};
