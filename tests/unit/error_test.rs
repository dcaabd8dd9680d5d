//! Tests for error types

use job_executor::core::{HistoryError, JobError, PoolError, RepositoryError, SchedulerError};

#[test]
fn test_illegal_state_error() {
    let err = SchedulerError::IllegalState("already active".to_string());
    assert_eq!(format!("{err}"), "illegal state: already active");
}

#[test]
fn test_pool_error_is_transparent() {
    let err = SchedulerError::from(PoolError::PoolShutdown);
    assert_eq!(format!("{err}"), "pool has been shut down");
}

#[test]
fn test_not_found_error() {
    let err = JobError::NotFound(42);
    assert_eq!(format!("{err}"), "job 42 not found");
}

#[test]
fn test_failed_job_keeps_source() {
    let err = JobError::Failed {
        job_id: 7,
        source: anyhow::anyhow!("timeout talking to billing"),
    };
    assert_eq!(format!("{err}"), "job 7 failed: timeout talking to billing");
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_repository_error_converts_into_job_error() {
    let err: JobError = RepositoryError::Unavailable("db down".to_string()).into();
    assert_eq!(format!("{err}"), "repository unavailable: db down");
}

#[test]
fn test_history_out_of_range() {
    let err = HistoryError::OutOfRange { index: 5, size: 2 };
    assert_eq!(format!("{err}"), "history index 5 out of range (size 2)");
}
