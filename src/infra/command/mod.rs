//! Command-execution façades.

pub mod local;

pub use local::{FailedJobHandler, JobHandler, LocalCommandExecutor, LogFailedJob};
