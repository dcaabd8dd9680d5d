//! Configuration models for the executor and its worker pool.

pub mod executor;
pub mod pool;

pub use executor::{ExecutorConfig, ENV_PREFIX};
pub use pool::WorkerPoolConfig;
