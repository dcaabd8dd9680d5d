//! # Job Executor
//!
//! Background job execution for a business-process engine.
//!
//! The executor picks up due asynchronous jobs (timer fires, async
//! continuations, retries) from a shared repository and runs each one exactly
//! once per attempt, with bounded concurrency, graceful or immediate shutdown
//! and a rolling execution history.
//!
//! ## Core Problem Solved
//!
//! Several scheduler instances may share one job backlog. Each must:
//!
//! - **Claim only what it can start**: the fetch batch is sized from free
//!   worker threads plus free admission-queue slots
//! - **Never lose a claim**: work it cannot run is given back to the backlog
//!   instead of being dropped or left locked
//! - **Keep causal order**: jobs that depend on each other run in sequence on
//!   one worker thread
//! - **Degrade, not crash**: failing jobs and failing fetches are logged and
//!   recorded; the fetch loop backs off and keeps going
//!
//! ## Components
//!
//! - [`core::HistoryRing`]: fixed-capacity ring of recent executions
//! - [`core::JobHandle`]: one or several job ids run through the command façade
//! - [`core::WorkerPool`]: OS worker threads with a bounded, non-blocking
//!   admission queue and a give-back overflow policy
//! - [`core::PendingJobsFetcher`]: dedicated claim-and-submit loop with
//!   adaptive sleeping and exponential backoff
//! - [`core::JobExecutor`]: lifecycle, live configuration and capacity queries
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use job_executor::builders::build_executor;
//! use job_executor::config::ExecutorConfig;
//! use job_executor::core::{EngineHandle, Job};
//! use job_executor::infra::{InMemoryJobRepository, LocalCommandExecutor};
//!
//! job_executor::util::init_tracing();
//!
//! let repository = Arc::new(InMemoryJobRepository::new());
//! let commands = Arc::new(LocalCommandExecutor::new(repository.clone()));
//! commands.register("timer", MyTimerHandler);
//!
//! let executor = build_executor(
//!     ExecutorConfig::from_env()?,
//!     repository.clone(),
//!     commands,
//!     EngineHandle::new("default"),
//! )?;
//! executor.start()?;
//!
//! repository.insert(Job::new("timer", now_ms));
//! executor.job_was_added();
//!
//! executor.shutdown_graceful(true);
//! ```
//!
//! For complete scenarios, see `tests/job_executor_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Jobs, handles, history, worker pool, fetcher and executor.
pub mod core;
/// Configuration models for the executor and its worker pool.
pub mod config;
/// Builders to construct executors from configuration.
pub mod builders;
/// Infrastructure adapters: repositories and command façades.
pub mod infra;
/// Shared utilities.
pub mod util;
