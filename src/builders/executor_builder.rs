//! Build job executors from configuration.

use std::sync::Arc;

use tracing::debug;

use crate::config::ExecutorConfig;
use crate::core::{CommandExecutor, EngineHandle, JobExecutor, JobRepository, SchedulerError};

/// Build an inactive executor from `cfg` and its collaborators.
///
/// # Errors
///
/// Returns `SchedulerError::InvalidConfig` if `cfg` fails validation.
pub fn build_executor(
    cfg: ExecutorConfig,
    repository: Arc<dyn JobRepository>,
    commands: Arc<dyn CommandExecutor>,
    engine: EngineHandle,
) -> Result<JobExecutor, SchedulerError> {
    debug!(engine = %engine, lock_owner = %cfg.lock_owner, "Building job executor");
    Ok(JobExecutor::new(cfg)?
        .with_repository(repository)
        .with_command_executor(commands)
        .with_engine(engine))
}

/// Like [`build_executor`], reading the configuration from JSON.
///
/// # Errors
///
/// Returns `SchedulerError::InvalidConfig` if the JSON is malformed or the
/// configuration fails validation.
pub fn build_executor_from_json(
    json: &str,
    repository: Arc<dyn JobRepository>,
    commands: Arc<dyn CommandExecutor>,
    engine: EngineHandle,
) -> Result<JobExecutor, SchedulerError> {
    let cfg = ExecutorConfig::from_json_str(json)?;
    build_executor(cfg, repository, commands, engine)
}
