//! Builders wiring configuration and collaborators into an executor.

pub mod executor_builder;

pub use executor_builder::{build_executor, build_executor_from_json};
