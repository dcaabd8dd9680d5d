//! In-process command façade dispatching jobs to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::core::executor::{Command, CommandContext, CommandExecutor, EngineHandle};
use crate::core::job::{Job, JobRepository};
use crate::core::{AppResult, JobError};

/// Business logic for one job type.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run `job` inside the transaction `ctx`.
    async fn handle(&self, job: &Job, ctx: &CommandContext) -> AppResult<()>;
}

/// Decision point invoked when a job attempt fails.
///
/// Retry bookkeeping or dead-lettering belongs in an implementation of this
/// trait; the executor itself applies no policy.
pub trait FailedJobHandler: Send + Sync + 'static {
    /// Called once per failed attempt, after the transaction rolled back.
    fn job_failed(&self, job: &Job, error: &JobError);
}

impl<F> FailedJobHandler for F
where
    F: Fn(&Job, &JobError) + Send + Sync + 'static,
{
    fn job_failed(&self, job: &Job, error: &JobError) {
        self(job, error);
    }
}

/// Default failure handling: log and leave the job alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFailedJob;

impl FailedJobHandler for LogFailedJob {
    fn job_failed(&self, job: &Job, error: &JobError) {
        warn!(
            job_id = job.id,
            handler_type = %job.handler_type,
            retries = job.retries,
            error = %error,
            "Job attempt failed"
        );
    }
}

/// Façade running commands in-process, with handlers looked up by
/// [`Job::handler_type`].
///
/// Successful jobs are deleted from the repository inside the same
/// transaction context.
pub struct LocalCommandExecutor {
    repository: Arc<dyn JobRepository>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    failed: Box<dyn FailedJobHandler>,
}

impl LocalCommandExecutor {
    /// Create a façade that deletes finished jobs from `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            handlers: RwLock::new(HashMap::new()),
            failed: Box::new(LogFailedJob),
        }
    }

    /// Replace the failure decision point.
    #[must_use]
    pub fn with_failed_job_handler(mut self, failed: impl FailedJobHandler) -> Self {
        self.failed = Box::new(failed);
        self
    }

    /// Register `handler` for jobs of `handler_type`, replacing any previous one.
    pub fn register(&self, handler_type: impl Into<String>, handler: impl JobHandler) {
        self.handlers
            .write()
            .insert(handler_type.into(), Arc::new(handler));
    }

    /// True if a handler is registered for `handler_type`.
    #[must_use]
    pub fn has_handler(&self, handler_type: &str) -> bool {
        self.handlers.read().contains_key(handler_type)
    }

    async fn dispatch(&self, job: &Job, ctx: &CommandContext) -> Result<(), JobError> {
        let handler = self
            .handlers
            .read()
            .get(&job.handler_type)
            .cloned()
            .ok_or_else(|| JobError::NoHandler(job.handler_type.clone()))?;

        handler
            .handle(job, ctx)
            .await
            .map_err(|source| JobError::Failed {
                job_id: job.id,
                source,
            })?;

        self.repository.delete_job(job.id)?;
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for LocalCommandExecutor {
    async fn execute(&self, command: &dyn Command, engine: &EngineHandle) -> Result<(), JobError> {
        let ctx = CommandContext::begin(engine.clone());
        debug!(transaction_id = %ctx.transaction_id(), engine = %engine, "Transaction started");

        match command.execute(&ctx).await {
            Ok(()) => {
                debug!(transaction_id = %ctx.transaction_id(), "Transaction committed");
                Ok(())
            }
            Err(e) => {
                debug!(transaction_id = %ctx.transaction_id(), error = %e, "Transaction rolled back");
                Err(e)
            }
        }
    }

    async fn run_job(&self, job: &Job, ctx: &CommandContext) -> Result<(), JobError> {
        let outcome = self.dispatch(job, ctx).await;
        if let Err(e) = &outcome {
            error!(job_id = job.id, handler_type = %job.handler_type, error = %e, "Job handler failed");
            self.failed.job_failed(job, e);
        }
        outcome
    }
}

impl std::fmt::Debug for LocalCommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.read().keys().cloned().collect();
        types.sort();
        f.debug_struct("LocalCommandExecutor")
            .field("handler_types", &types)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::repository::memory::InMemoryJobRepository;
    use parking_lot::Mutex;

    struct Echo {
        seen: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    #[async_trait]
    impl JobHandler for Echo {
        async fn handle(&self, job: &Job, _ctx: &CommandContext) -> AppResult<()> {
            self.seen.lock().push(job.payload.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl JobHandler for Broken {
        async fn handle(&self, _job: &Job, _ctx: &CommandContext) -> AppResult<()> {
            anyhow::bail!("service down")
        }
    }

    fn ctx() -> CommandContext {
        CommandContext::begin(EngineHandle::new("test"))
    }

    #[tokio::test]
    async fn successful_job_runs_handler_and_is_deleted() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let facade = LocalCommandExecutor::new(repo.clone());
        facade.register("echo", Echo { seen: seen.clone() });

        let id = repo.insert(Job::new("echo", 0).with_payload(serde_json::json!({"n": 1})));
        let job = repo.get(id).unwrap();
        facade.run_job(&job, &ctx()).await.unwrap();

        assert_eq!(*seen.lock(), vec![serde_json::json!({"n": 1})]);
        assert!(repo.get(id).is_none());
    }

    #[tokio::test]
    async fn failures_reach_the_failed_job_handler_and_keep_the_job() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let facade = LocalCommandExecutor::new(repo.clone())
            .with_failed_job_handler(move |job: &Job, e: &JobError| {
                sink.lock().push((job.id, e.to_string()));
            });
        facade.register("broken", Broken);

        let broken = repo.insert(Job::new("broken", 0));
        let unknown = repo.insert(Job::new("unknown", 0));

        let err = facade.run_job(&repo.get(broken).unwrap(), &ctx()).await.unwrap_err();
        assert!(matches!(err, JobError::Failed { job_id, .. } if job_id == broken));
        let err = facade.run_job(&repo.get(unknown).unwrap(), &ctx()).await.unwrap_err();
        assert!(matches!(err, JobError::NoHandler(ref t) if t == "unknown"));

        assert_eq!(failures.lock().len(), 2);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn execute_opens_a_fresh_transaction_per_command() {
        struct Capture(Mutex<Vec<uuid::Uuid>>);

        #[async_trait]
        impl Command for Capture {
            async fn execute(&self, ctx: &CommandContext) -> Result<(), JobError> {
                self.0.lock().push(ctx.transaction_id());
                assert_eq!(ctx.engine().name(), "engine-1");
                Ok(())
            }
        }

        let facade = LocalCommandExecutor::new(Arc::new(InMemoryJobRepository::new()));
        let command = Capture(Mutex::new(Vec::new()));
        let engine = EngineHandle::new("engine-1");
        facade.execute(&command, &engine).await.unwrap();
        facade.execute(&command, &engine).await.unwrap();

        let ids = command.0.lock();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
