//! Error types for infrastructure-level sandbox failures
//!
//! Only failures of the machinery around a submission live here: the staging
//! area could not be written, the isolation engine was unreachable, or an
//! instance could not be created. A submission that crashes, exits non-zero
//! or runs past its deadline is not an error; it comes back as an
//! `ExecutionResult`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Could not prepare staging area: {0}")]
    Staging(String),
    #[error("Isolation engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Could not launch sandbox instance: {0}")]
    Launch(String),
    #[error("Bollard (Docker client) error: {0}")]
    Engine(#[from] bollard::errors::Error),
    #[error("I/O error during sandbox operation: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SandboxError {
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            SandboxError::Staging(_) => "staging_error",
            SandboxError::EngineUnavailable(_) => "engine_unavailable",
            SandboxError::Launch(_) => "launch_error",
            SandboxError::Engine(_) => "engine_error",
            SandboxError::Io(_) => "io_error",
            SandboxError::Config(_) => "config_error",
        }
    }
}
