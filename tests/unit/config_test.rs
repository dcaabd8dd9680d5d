//! Tests for configuration validation

use job_executor::config::{ExecutorConfig, WorkerPoolConfig};
use job_executor::core::SchedulerError;
use std::time::Duration;

#[test]
fn test_executor_config_defaults_are_valid() {
    let cfg = ExecutorConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.worker_count >= 1);
    assert!(!cfg.lock_owner.is_empty());
}

#[test]
fn test_executor_config_invalid_values() {
    assert!(ExecutorConfig::new().with_worker_count(0).validate().is_err());
    assert!(ExecutorConfig::new().with_queue_capacity(0).validate().is_err());
    assert!(ExecutorConfig::new().with_history_capacity(0).validate().is_err());
    assert!(ExecutorConfig::new()
        .with_poll_interval(Duration::ZERO)
        .validate()
        .is_err());
    assert!(ExecutorConfig::new().with_lock_owner("  ").validate().is_err());
}

#[test]
fn test_executor_config_from_json_fills_defaults() {
    let cfg = ExecutorConfig::from_json_str(
        r#"{ "worker_count": 4, "queue_capacity": 8, "lock_owner": "node-b" }"#,
    )
    .unwrap();
    assert_eq!(cfg.worker_count, 4);
    assert_eq!(cfg.queue_capacity, 8);
    assert_eq!(cfg.lock_owner, "node-b");
    assert_eq!(cfg.history_capacity, 100);
    assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
}

#[test]
fn test_executor_config_from_json_rejects_invalid() {
    let err = ExecutorConfig::from_json_str(r#"{ "queue_capacity": 0 }"#).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));

    let err = ExecutorConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[test]
fn test_executor_config_json_roundtrip() {
    let cfg = ExecutorConfig::new()
        .with_worker_count(3)
        .with_lock_owner("node-c");
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(ExecutorConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_worker_pool_config_builders() {
    let cfg = WorkerPoolConfig::new()
        .with_worker_count(6)
        .with_queue_capacity(12)
        .with_thread_name_prefix("jobs");
    assert_eq!(cfg.worker_count, 6);
    assert_eq!(cfg.queue_capacity, 12);
    assert_eq!(cfg.thread_name_prefix, "jobs");
    assert!(cfg.validate().is_ok());
}
