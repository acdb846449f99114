//! Configuration loader for YAML files and environment overrides

use crate::config::types::*;
use crate::errors::SandboxError;
use std::env;
use std::path::Path;
use tokio::fs;

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub async fn from_optional_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            log::info!("Loading configuration from file: {}", path.display());
            Self::from_file(path).await
        } else {
            log::info!(
                "No configuration file at {}, using defaults",
                path.display()
            );
            Self::from_defaults()
        }
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandboxConfig, SandboxError> {
        let mut config: SandboxConfig = if content.trim().is_empty() {
            SandboxConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| SandboxError::config(format!("Failed to parse YAML config: {}", e)))?
        };

        Self::resolve_environment(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_defaults() -> Result<SandboxConfig, SandboxError> {
        let mut config = SandboxConfig::default();
        Self::resolve_environment(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CODERUN_*` environment variables on top of the parsed file.
    fn resolve_environment(config: &mut SandboxConfig) -> Result<(), SandboxError> {
        if let Ok(image) = env::var("CODERUN_IMAGE") {
            config.runtime.image = image;
        }

        if let Ok(value) = env::var("CODERUN_TIMEOUT_SECS") {
            config.limits.timeout_secs = parse_env("CODERUN_TIMEOUT_SECS", &value)?;
        }

        if let Ok(value) = env::var("CODERUN_MEMORY_MB") {
            config.limits.memory_mb = parse_env("CODERUN_MEMORY_MB", &value)?;
        }

        if let Ok(value) = env::var("CODERUN_CPUS") {
            config.limits.cpus = parse_env("CODERUN_CPUS", &value)?;
        }

        if let Ok(value) = env::var("CODERUN_NETWORK") {
            config.network = NetworkPolicy::parse(&value)?;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, SandboxError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        SandboxError::config(format!("Invalid value '{}' for {}: {}", value, name, e))
    })
}
