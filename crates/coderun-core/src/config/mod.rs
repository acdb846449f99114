//! Configuration module for the sandbox
//!
//! Supports YAML configuration files with `CODERUN_*` environment overrides.

pub mod types;
pub mod loader;

pub use types::*;
pub use loader::*;

#[cfg(test)]
mod tests;

use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
    ConfigLoader::from_file(path).await
}
