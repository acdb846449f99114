//! Configuration types for the sandbox
//!
//! Every field carries a serde default so an empty YAML document yields the
//! reference configuration: `python:3.11-slim`, half a CPU, 128 MiB of memory,
//! a ten second deadline and no network.

use crate::errors::SandboxError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub network: NetworkPolicy,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The interpreter image and how a staged file is handed to it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
    #[serde(default = "default_source_filename")]
    pub source_filename: String,
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
    #[serde(default = "default_user")]
    pub user: Option<String>,
    #[serde(default = "default_true")]
    pub read_only_mount: bool,
}

/// Ceilings for a single execution, enforced by the isolation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    #[serde(default = "default_tmpfs_size_mb")]
    pub tmpfs_size_mb: u64,
    /// Ceiling on the engine-side log kept for one instance (KiB).
    #[serde(default = "default_output_limit_kb")]
    pub output_limit_kb: u64,
}

/// Per-request adjustments to [`ResourceLimits`]. Unset fields keep the
/// configured value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceOverrides {
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Network access granted to a sandbox instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// No network interface besides loopback
    #[serde(alias = "none")]
    Disabled,
    /// The engine's default bridge network
    Bridge,
}

/// Isolation engine behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub pull_missing_image: bool,
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    /// Seconds past the execution deadline after which the instance kills
    /// itself, covering a host process that died before tearing it down.
    /// Needs `timeout` from coreutils in the image; `0` disables it.
    #[serde(default = "default_watchdog_grace_secs")]
    pub watchdog_grace_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_interpreter() -> Vec<String> {
    vec!["python".to_string()]
}

fn default_source_filename() -> String {
    "main.py".to_string()
}

fn default_mount_point() -> String {
    "/app".to_string()
}

fn default_user() -> Option<String> {
    Some("65534:65534".to_string())
}

fn default_cpus() -> f64 {
    0.5
}

fn default_memory_mb() -> u64 {
    128
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_pids_limit() -> i64 {
    64
}

fn default_tmpfs_size_mb() -> u64 {
    16
}

fn default_output_limit_kb() -> u64 {
    1024
}

fn default_kill_grace_secs() -> u64 {
    2
}

fn default_watchdog_grace_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            limits: ResourceLimits::default(),
            network: NetworkPolicy::default(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            interpreter: default_interpreter(),
            source_filename: default_source_filename(),
            mount_point: default_mount_point(),
            user: default_user(),
            read_only_mount: true,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: default_cpus(),
            memory_mb: default_memory_mb(),
            timeout_secs: default_timeout_secs(),
            pids_limit: default_pids_limit(),
            tmpfs_size_mb: default_tmpfs_size_mb(),
            output_limit_kb: default_output_limit_kb(),
        }
    }
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        NetworkPolicy::Disabled
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pull_missing_image: true,
            kill_grace_secs: default_kill_grace_secs(),
            watchdog_grace_secs: default_watchdog_grace_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ResourceLimits {
    /// CPU share in the engine's billionths-of-a-CPU unit.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0).round() as i64
    }

    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb as i64).saturating_mul(1024 * 1024)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Apply per-request overrides. An override can only tighten a ceiling;
    /// values above the configured limit, and zero or negative values, are
    /// ignored.
    pub fn merge(&self, overrides: &ResourceOverrides) -> ResourceLimits {
        let mut merged = self.clone();
        if let Some(cpus) = overrides.cpus {
            if cpus > 0.0 && cpus < self.cpus {
                merged.cpus = cpus;
            }
        }
        if let Some(memory_mb) = overrides.memory_mb {
            if memory_mb > 0 && memory_mb < self.memory_mb {
                merged.memory_mb = memory_mb;
            }
        }
        if let Some(timeout_secs) = overrides.timeout_secs {
            if timeout_secs > 0 && timeout_secs < self.timeout_secs {
                merged.timeout_secs = timeout_secs;
            }
        }
        merged
    }
}

impl NetworkPolicy {
    /// Docker `NetworkMode` value for this policy.
    pub fn network_mode(&self) -> &'static str {
        match self {
            NetworkPolicy::Disabled => "none",
            NetworkPolicy::Bridge => "bridge",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SandboxError> {
        match value.trim().to_lowercase().as_str() {
            "none" | "disabled" => Ok(NetworkPolicy::Disabled),
            "bridge" => Ok(NetworkPolicy::Bridge),
            other => Err(SandboxError::config(format!(
                "Unknown network policy '{}' (expected 'none' or 'bridge')",
                other
            ))),
        }
    }
}

impl SandboxConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.runtime.image.trim().is_empty() {
            return Err(SandboxError::config("Runtime image cannot be empty"));
        }

        if self.runtime.interpreter.is_empty()
            || self.runtime.interpreter.iter().any(|arg| arg.is_empty())
        {
            return Err(SandboxError::config("Runtime interpreter cannot be empty"));
        }

        let filename = &self.runtime.source_filename;
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename == "."
            || filename == ".."
        {
            return Err(SandboxError::config(format!(
                "Source filename '{}' must be a plain file name",
                filename
            )));
        }

        if !self.runtime.mount_point.starts_with('/') {
            return Err(SandboxError::config(format!(
                "Mount point '{}' must be an absolute path",
                self.runtime.mount_point
            )));
        }

        if !(self.limits.cpus > 0.0) || !self.limits.cpus.is_finite() {
            return Err(SandboxError::config("CPU share must be greater than 0"));
        }

        if self.limits.memory_mb == 0 {
            return Err(SandboxError::config("Memory ceiling must be greater than 0"));
        }

        if self.limits.timeout_secs == 0 {
            return Err(SandboxError::config("Timeout must be greater than 0"));
        }

        if self.limits.output_limit_kb == 0 {
            return Err(SandboxError::config("Output limit must be greater than 0"));
        }

        Ok(())
    }
}
