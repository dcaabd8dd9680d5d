//! Infrastructure adapters: job repositories and command façades.

pub mod command;
pub mod repository;

pub use command::{FailedJobHandler, JobHandler, LocalCommandExecutor, LogFailedJob};
pub use repository::InMemoryJobRepository;
