//! Isolation engines for sandboxed runtime evaluation.
//!
//! An engine launches short-lived, resource-capped instances from a base
//! image, mounts a single host directory into them, reports their exit code
//! and output, and tears them down. CPU, memory and process ceilings are
//! enforced by the engine itself; the executor only owns the wall-clock
//! deadline.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::{NetworkPolicy, ResourceLimits};
use crate::errors::SandboxError;

pub mod docker;

pub use docker::DockerEngine;

/// Label attached to every instance this crate creates.
pub const MANAGED_LABEL: &str = "coderun.managed";

/// A host directory exposed inside the instance
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    /// Bind specification in `host:container[:ro]` form.
    pub fn bind_spec(&self) -> String {
        let mut spec = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            spec.push_str(":ro");
        }
        spec
    }
}

/// Everything needed to start one instance
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub image: String,
    pub entrypoint: Vec<String>,
    pub mount: Mount,
    pub working_dir: String,
    pub user: Option<String>,
    pub limits: ResourceLimits,
    pub network: NetworkPolicy,
    pub labels: HashMap<String, String>,
}

/// A running or exited instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub id: String,
    pub name: String,
}

/// How an instance ended on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceExit {
    pub code: i64,
    pub oom_killed: bool,
}

#[async_trait]
pub trait IsolationEngine: Send + Sync + 'static {
    /// Check that the engine is reachable.
    async fn ping(&self) -> Result<(), SandboxError>;

    /// Make sure `image` is available locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError>;

    /// Create and start an instance. If the instance was created but could
    /// not be started, the engine removes it before returning the error.
    async fn launch(&self, request: &LaunchRequest) -> Result<InstanceHandle, SandboxError>;

    /// Block until the instance exits.
    async fn wait(&self, handle: &InstanceHandle) -> Result<InstanceExit, SandboxError>;

    /// Full stdout and stderr of an exited instance.
    async fn collect_output(&self, handle: &InstanceHandle) -> Result<(String, String), SandboxError>;

    /// Forcibly stop a running instance.
    async fn terminate(&self, handle: &InstanceHandle) -> Result<(), SandboxError>;

    /// Remove the instance and everything it holds. Removing an instance
    /// that no longer exists succeeds.
    async fn release(&self, handle: &InstanceHandle) -> Result<(), SandboxError>;

    /// Remove every instance carrying `label`, running or not. Returns how
    /// many were removed.
    async fn release_labelled(&self, label: &str) -> Result<usize, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_spec() {
        let mut mount = Mount {
            host_path: PathBuf::from("/tmp/coderun-abc"),
            container_path: "/app".to_string(),
            read_only: true,
        };
        assert_eq!(mount.bind_spec(), "/tmp/coderun-abc:/app:ro");

        mount.read_only = false;
        assert_eq!(mount.bind_spec(), "/tmp/coderun-abc:/app");
    }
}
