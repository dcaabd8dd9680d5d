//! Job executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::WorkerPoolConfig;
use crate::core::SchedulerError;

/// Prefix of every environment variable read by [`ExecutorConfig::from_env`].
pub const ENV_PREFIX: &str = "JOB_EXECUTOR_";

/// Settings of a [`JobExecutor`](crate::core::JobExecutor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker threads. Changeable while running.
    pub worker_count: usize,
    /// Capacity of the admission queue. Fixed while running.
    pub queue_capacity: usize,
    /// Number of finished executions kept in history. Fixed while running.
    pub history_capacity: usize,
    /// Default wait between fetches when idle.
    pub poll_interval_ms: u64,
    /// Wait between fetches while all slots are taken.
    pub busy_interval_ms: u64,
    /// How long a claim stays valid before other schedulers may take the job.
    pub max_lock_duration_ms: u64,
    /// Upper bound on draining the pool during shutdown.
    pub shutdown_timeout_ms: u64,
    /// Owner recorded on claims made by this scheduler instance.
    pub lock_owner: String,
    /// Worker threads are named `{prefix}-{id}`.
    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            queue_capacity: 3,
            history_capacity: 100,
            poll_interval_ms: 5_000,
            busy_interval_ms: 100,
            max_lock_duration_ms: 300_000,
            shutdown_timeout_ms: 60_000,
            lock_owner: uuid::Uuid::new_v4().to_string(),
            thread_name_prefix: "job-worker".into(),
        }
    }
}

impl ExecutorConfig {
    /// Default configuration with a fresh random lock owner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the admission queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the history capacity.
    #[must_use]
    pub const fn with_history_capacity(mut self, history_capacity: usize) -> Self {
        self.history_capacity = history_capacity;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    /// Set the saturated poll interval.
    #[must_use]
    pub fn with_busy_interval(mut self, interval: Duration) -> Self {
        self.busy_interval_ms = millis(interval);
        self
    }

    /// Set the claim duration.
    #[must_use]
    pub fn with_max_lock_duration(mut self, duration: Duration) -> Self {
        self.max_lock_duration_ms = millis(duration);
        self
    }

    /// Set the shutdown drain timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = millis(timeout);
        self
    }

    /// Set the lock owner.
    #[must_use]
    pub fn with_lock_owner(mut self, lock_owner: impl Into<String>) -> Self {
        self.lock_owner = lock_owner.into();
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Idle poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Saturated poll interval.
    #[must_use]
    pub const fn busy_interval(&self) -> Duration {
        Duration::from_millis(self.busy_interval_ms)
    }

    /// Claim duration.
    #[must_use]
    pub const fn max_lock_duration(&self) -> Duration {
        Duration::from_millis(self.max_lock_duration_ms)
    }

    /// Shutdown drain timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Worker pool settings derived from this configuration.
    #[must_use]
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_count(self.worker_count)
            .with_queue_capacity(self.queue_capacity)
            .with_thread_name_prefix(self.thread_name_prefix.clone())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.history_capacity == 0 {
            return Err("history_capacity must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.busy_interval_ms == 0 {
            return Err("busy_interval_ms must be greater than 0".into());
        }
        if self.max_lock_duration_ms == 0 {
            return Err("max_lock_duration_ms must be greater than 0".into());
        }
        if self.lock_owner.trim().is_empty() {
            return Err("lock_owner must not be empty".into());
        }
        self.pool_config().validate()
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the document does not parse
    /// or fails validation.
    pub fn from_json_str(json: &str) -> Result<Self, SchedulerError> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| SchedulerError::InvalidConfig(format!("malformed JSON: {e}")))?;
        cfg.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Read `JOB_EXECUTOR_*` variables, loading a `.env` file first if present.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for unparsable values or a
    /// configuration that fails validation.
    pub fn from_env() -> Result<Self, SchedulerError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from a variable lookup, starting from defaults.
    ///
    /// Keys are the upper-case field names prefixed with [`ENV_PREFIX`].
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for unparsable values or a
    /// configuration that fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SchedulerError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = var("WORKER_COUNT") {
            cfg.worker_count = parse("WORKER_COUNT", &v)?;
        }
        if let Some(v) = var("QUEUE_CAPACITY") {
            cfg.queue_capacity = parse("QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = var("HISTORY_CAPACITY") {
            cfg.history_capacity = parse("HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = var("POLL_INTERVAL_MS") {
            cfg.poll_interval_ms = parse("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("BUSY_INTERVAL_MS") {
            cfg.busy_interval_ms = parse("BUSY_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("MAX_LOCK_DURATION_MS") {
            cfg.max_lock_duration_ms = parse("MAX_LOCK_DURATION_MS", &v)?;
        }
        if let Some(v) = var("SHUTDOWN_TIMEOUT_MS") {
            cfg.shutdown_timeout_ms = parse("SHUTDOWN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("LOCK_OWNER") {
            cfg.lock_owner = v;
        }
        if let Some(v) = var("THREAD_NAME_PREFIX") {
            cfg.thread_name_prefix = v;
        }

        cfg.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(cfg)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, SchedulerError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        SchedulerError::InvalidConfig(format!("{ENV_PREFIX}{name}={value:?}: {e}"))
    })
}
