//! Tests for builder modules

use job_executor::builders::{build_executor, build_executor_from_json};
use job_executor::config::ExecutorConfig;
use job_executor::core::{EngineHandle, SchedulerError};
use job_executor::infra::{InMemoryJobRepository, LocalCommandExecutor};
use std::sync::Arc;

#[test]
fn test_build_executor_wires_collaborators() {
    let repository = Arc::new(InMemoryJobRepository::new());
    let commands = Arc::new(LocalCommandExecutor::new(repository.clone()));
    let executor = build_executor(
        ExecutorConfig::new().with_worker_count(1).with_lock_owner("node-a"),
        repository,
        commands,
        EngineHandle::new("engine"),
    )
    .unwrap();

    assert!(!executor.is_active());
    assert_eq!(executor.lock_owner(), "node-a");
    executor.start().unwrap();
    assert!(executor.is_active());
    executor.shutdown_graceful(true);
}

#[test]
fn test_build_executor_from_json() {
    let repository = Arc::new(InMemoryJobRepository::new());
    let commands = Arc::new(LocalCommandExecutor::new(repository.clone()));
    let executor = build_executor_from_json(
        r#"{ "worker_count": 2, "queue_capacity": 5, "history_capacity": 7 }"#,
        repository,
        commands,
        EngineHandle::new("engine"),
    )
    .unwrap();

    let cfg = executor.config();
    assert_eq!(cfg.worker_count, 2);
    assert_eq!(cfg.queue_capacity, 5);
    assert_eq!(cfg.history_capacity, 7);
}

#[test]
fn test_build_executor_rejects_invalid_config() {
    let repository = Arc::new(InMemoryJobRepository::new());
    let commands = Arc::new(LocalCommandExecutor::new(repository.clone()));
    let result = build_executor_from_json(
        r#"{ "worker_count": 0 }"#,
        repository,
        commands,
        EngineHandle::new("engine"),
    );
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}
