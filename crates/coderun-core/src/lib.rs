//! Sandboxed execution of untrusted code submissions.
//!
//! A submission is written into a private staging directory, run inside a
//! short-lived container with CPU, memory, process and wall-clock ceilings,
//! and reported back as an [`ExecutionResult`]. The staging directory and the
//! container are torn down on every exit path.
//!
//! # Architecture Overview
//!
//! - **executor**: stage, launch, supervise the deadline, tear down
//! - **engine**: the isolation engine capability and its Docker implementation
//! - **staging**: per-execution temporary directories
//! - **model**: submissions and results
//! - **config**: YAML configuration with environment overrides

pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod model;
pub mod staging;

pub use config::{ConfigLoader, NetworkPolicy, ResourceLimits, ResourceOverrides, SandboxConfig};
pub use engine::{DockerEngine, IsolationEngine};
pub use errors::SandboxError;
pub use executor::{CodeExecutor, SandboxExecutor};
pub use model::{ExecutionResult, ExecutionStatus, SourceSubmission, TIMEOUT_SENTINEL};
