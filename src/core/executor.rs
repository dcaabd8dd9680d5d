//! Command-execution façade: the transaction boundary jobs run inside.

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::job::Job;
use crate::core::JobError;

/// Handle to the process engine the jobs belong to.
///
/// Passed through to the façade untouched; the executor never inspects it
/// beyond logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHandle {
    name: String,
}

impl EngineHandle {
    /// Create a handle for the engine called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Context of one command invocation (one transaction).
#[derive(Debug, Clone)]
pub struct CommandContext {
    transaction_id: Uuid,
    engine: EngineHandle,
}

impl CommandContext {
    /// Open a context for a new transaction on `engine`.
    #[must_use]
    pub fn begin(engine: EngineHandle) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            engine,
        }
    }

    /// Identifier of the surrounding transaction.
    #[must_use]
    pub const fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    /// Engine the transaction runs against.
    #[must_use]
    pub const fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

/// A unit of work the façade runs inside a transaction.
#[async_trait]
pub trait Command: Send + Sync {
    /// Perform the work. An error makes the façade roll back.
    async fn execute(&self, ctx: &CommandContext) -> Result<(), JobError>;
}

/// Runs commands transactionally and dispatches job business logic.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use job_executor::core::{Command, CommandContext, CommandExecutor, EngineHandle, Job, JobError};
///
/// struct Direct;
///
/// #[async_trait]
/// impl CommandExecutor for Direct {
///     async fn execute(&self, command: &dyn Command, engine: &EngineHandle) -> Result<(), JobError> {
///         command.execute(&CommandContext::begin(engine.clone())).await
///     }
///
///     async fn run_job(&self, _job: &Job, _ctx: &CommandContext) -> Result<(), JobError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    /// Run `command` inside a transaction boundary.
    ///
    /// Any failure is returned to the caller after the transaction has been
    /// rolled back.
    ///
    /// # Threading
    ///
    /// Called from a dedicated worker thread driving its own single-threaded
    /// tokio runtime, so blocking database I/O here only stalls that worker.
    async fn execute(&self, command: &dyn Command, engine: &EngineHandle) -> Result<(), JobError>;

    /// Run the business logic of `job` within the transaction `ctx`.
    ///
    /// Retry bookkeeping and dead-lettering, if any, belong here.
    async fn run_job(&self, job: &Job, ctx: &CommandContext) -> Result<(), JobError>;
}
