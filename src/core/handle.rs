//! Unit of work binding claimed job ids to the command-execution façade.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::core::executor::{Command, CommandContext, CommandExecutor, EngineHandle};
use crate::core::history::{HistoryEntry, HistoryRing};
use crate::core::job::{JobId, JobRepository};
use crate::core::JobError;
use crate::util::clock::Clock;

/// Collaborators shared by every handle of one executor run.
pub struct JobContext {
    /// Where jobs are looked up.
    pub repository: Arc<dyn JobRepository>,
    /// Transaction boundary and business logic dispatch.
    pub commands: Arc<dyn CommandExecutor>,
    /// Engine passed through to the façade.
    pub engine: EngineHandle,
    /// Execution history of the current run.
    pub history: Arc<HistoryRing>,
    /// Time source for history stamps.
    pub clock: Arc<dyn Clock>,
}

/// One or several causally-linked jobs run on a single worker.
pub struct JobHandle {
    job_ids: Vec<JobId>,
    context: Arc<JobContext>,
    finished: AtomicUsize,
}

impl JobHandle {
    /// Wrap a single independently runnable job.
    #[must_use]
    pub fn single(job_id: JobId, context: Arc<JobContext>) -> Self {
        Self::ordered(vec![job_id], context)
    }

    /// Wrap jobs that must run in exactly this order.
    #[must_use]
    pub fn ordered(job_ids: Vec<JobId>, context: Arc<JobContext>) -> Self {
        Self {
            job_ids,
            context,
            finished: AtomicUsize::new(0),
        }
    }

    /// All ids bound to this handle, in execution order.
    #[must_use]
    pub fn job_ids(&self) -> &[JobId] {
        &self.job_ids
    }

    /// Ids that have not finished yet.
    #[must_use]
    pub fn pending_ids(&self) -> &[JobId] {
        let done = self.finished.load(Ordering::Acquire).min(self.job_ids.len());
        &self.job_ids[done..]
    }

    /// Drop finished ids, keeping the handle only if work remains.
    #[must_use]
    pub fn into_unfinished(self) -> Option<Self> {
        let done = self.finished.load(Ordering::Acquire).min(self.job_ids.len());
        if done == self.job_ids.len() {
            return None;
        }
        let Self {
            mut job_ids,
            context,
            ..
        } = self;
        job_ids.drain(..done);
        Some(Self::ordered(job_ids, context))
    }

    /// Run every pending job in order, recording one history entry each.
    ///
    /// Failures are logged and captured in history; they never propagate.
    /// If the future is dropped part way, [`pending_ids`](Self::pending_ids)
    /// reports what did not finish.
    pub async fn run(&self) {
        let start = self.finished.load(Ordering::Acquire);
        for (index, &job_id) in self.job_ids.iter().enumerate().skip(start) {
            self.run_one(job_id).await;
            self.finished.store(index + 1, Ordering::Release);
        }
    }

    async fn run_one(&self, job_id: JobId) {
        let ctx = &self.context;
        let entry = HistoryEntry::started(job_id, format!("job-{job_id}"), ctx.clock.now_ms());
        let command = ExecuteJob {
            job_id,
            repository: ctx.repository.as_ref(),
            commands: ctx.commands.as_ref(),
        };

        let outcome = AssertUnwindSafe(ctx.commands.execute(&command, &ctx.engine))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))));

        let entry = match outcome {
            Ok(()) => {
                debug!(job_id = job_id, "Job completed");
                entry.completed(ctx.clock.now_ms())
            }
            Err(e) => {
                error!(job_id = job_id, error = %e, "Job execution failed");
                entry.failed(e)
            }
        };
        ctx.history.record(entry);
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_ids", &self.job_ids)
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Looks the job up and hands it to the façade's business logic.
struct ExecuteJob<'a> {
    job_id: JobId,
    repository: &'a dyn JobRepository,
    commands: &'a dyn CommandExecutor,
}

#[async_trait]
impl Command for ExecuteJob<'_> {
    async fn execute(&self, ctx: &CommandContext) -> Result<(), JobError> {
        let job = self
            .repository
            .find_job(self.job_id)?
            .ok_or(JobError::NotFound(self.job_id))?;
        self.commands.run_job(&job, ctx).await
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
