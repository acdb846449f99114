//! Sandbox executor: stage, launch, supervise, tear down.
//!
//! Each call owns one staging area and one engine instance. Both are
//! released before the call returns, whatever the outcome. Submitted code
//! that crashes, exits non-zero or overruns its deadline comes back as an
//! [`ExecutionResult`]; only infrastructure failures are returned as errors.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ResourceLimits, ResourceOverrides, SandboxConfig};
use crate::engine::{
    DockerEngine, InstanceHandle, IsolationEngine, LaunchRequest, Mount, MANAGED_LABEL,
};
use crate::errors::SandboxError;
use crate::model::{ExecutionResult, SourceSubmission};
use crate::staging::StagingArea;

const OOM_MESSAGE: &str = "Memory limit exceeded";

/// Object-safe entry point for callers that should not know which engine
/// runs the code.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute_code(
        &self,
        code: &str,
        overrides: &ResourceOverrides,
    ) -> Result<ExecutionResult, SandboxError>;
}

pub struct SandboxExecutor<E: IsolationEngine> {
    engine: Arc<E>,
    config: SandboxConfig,
}

impl SandboxExecutor<DockerEngine> {
    /// Executor backed by the local Docker daemon.
    pub fn docker(config: SandboxConfig) -> Result<Self, SandboxError> {
        let engine = DockerEngine::new(config.engine.pull_missing_image)?;
        Ok(Self::new(Arc::new(engine), config))
    }
}

impl<E: IsolationEngine> SandboxExecutor<E> {
    pub fn new(engine: Arc<E>, config: SandboxConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Check the engine and make the runtime image available. Intended to be
    /// called once at startup so the first submission does not pay for a pull.
    ///
    /// Also removes instances left behind by a process that died before it
    /// could tear them down. Run it only while no other executor shares the
    /// engine.
    pub async fn prepare(&self) -> Result<(), SandboxError> {
        self.engine.ping().await?;
        self.engine.ensure_image(&self.config.runtime.image).await?;
        match self.engine.release_labelled(MANAGED_LABEL).await {
            Ok(0) => {}
            Ok(removed) => log::info!("Removed {} leftover sandbox instance(s)", removed),
            Err(e) => log::warn!("Could not sweep leftover sandbox instances: {}", e),
        }
        log::info!(
            "Sandbox ready: image={} cpus={} memory={}MiB timeout={}s network={:?}",
            self.config.runtime.image,
            self.config.limits.cpus,
            self.config.limits.memory_mb,
            self.config.limits.timeout_secs,
            self.config.network
        );
        Ok(())
    }

    /// Run `code` under the configured ceilings.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult, SandboxError> {
        self.execute_with_limits(code, &ResourceOverrides::default())
            .await
    }

    pub async fn execute_submission(
        &self,
        submission: &SourceSubmission,
    ) -> Result<ExecutionResult, SandboxError> {
        self.execute(&submission.code).await
    }

    /// Run `code` with per-request overrides. Overrides may only tighten the
    /// configured ceilings.
    pub async fn execute_with_limits(
        &self,
        code: &str,
        overrides: &ResourceOverrides,
    ) -> Result<ExecutionResult, SandboxError> {
        let limits = self.config.limits.merge(overrides);
        let staging = StagingArea::create(&self.config.runtime.source_filename, code).await?;

        let started = Instant::now();
        let request = self.launch_request(&staging, &limits);
        let outcome = self.run_instance(&request, &limits).await;

        staging.release();

        match &outcome {
            Ok(result) => log::info!(
                "Execution finished: status={:?} returncode={} elapsed={:?}",
                result.status,
                result.returncode,
                started.elapsed()
            ),
            Err(e) => log::error!("Execution failed after {:?}: {}", started.elapsed(), e),
        }
        outcome
    }

    fn launch_request(&self, staging: &StagingArea, limits: &ResourceLimits) -> LaunchRequest {
        let runtime = &self.config.runtime;
        let mount_point = runtime.mount_point.trim_end_matches('/');
        let script_path_in_container = format!("{}/{}", mount_point, runtime.source_filename);

        let mut entrypoint = Vec::new();
        let watchdog_grace = self.config.engine.watchdog_grace_secs;
        if watchdog_grace > 0 {
            entrypoint.extend([
                "timeout".to_string(),
                "-s".to_string(),
                "KILL".to_string(),
                format!("{}s", limits.timeout_secs.saturating_add(watchdog_grace)),
            ]);
        }
        entrypoint.extend(runtime.interpreter.iter().cloned());
        entrypoint.push(script_path_in_container);

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        LaunchRequest {
            image: runtime.image.clone(),
            entrypoint,
            mount: Mount {
                host_path: staging.host_dir().to_path_buf(),
                container_path: runtime.mount_point.clone(),
                read_only: runtime.read_only_mount,
            },
            working_dir: runtime.mount_point.clone(),
            user: runtime.user.clone(),
            limits: limits.clone(),
            network: self.config.network,
            labels,
        }
    }

    async fn run_instance(
        &self,
        request: &LaunchRequest,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult, SandboxError> {
        let handle = self.engine.launch(request).await?;
        log::info!("Started sandbox instance {}", handle.name);

        let guard = InstanceGuard::new(self.engine.clone(), handle);
        let outcome = self.supervise(&guard.handle, limits).await;
        guard.release().await;
        outcome
    }

    async fn supervise(
        &self,
        handle: &InstanceHandle,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult, SandboxError> {
        let deadline = tokio::time::sleep(limits.timeout());

        tokio::select! {
            exit = self.engine.wait(handle) => {
                let exit = exit?;
                let (stdout, mut stderr) = self.engine.collect_output(handle).await?;
                if exit.oom_killed {
                    log::warn!("Sandbox instance {} hit its memory ceiling", handle.name);
                    if !stderr.is_empty() && !stderr.ends_with('\n') {
                        stderr.push('\n');
                    }
                    stderr.push_str(OOM_MESSAGE);
                }
                Ok(ExecutionResult::completed(stdout, stderr, exit.code))
            }
            _ = deadline => {
                log::warn!(
                    "Execution timed out for instance {} after {}s",
                    handle.name,
                    limits.timeout_secs
                );
                if let Err(e) = self.engine.terminate(handle).await {
                    log::error!("Failed to kill sandbox instance {}: {}", handle.name, e);
                }
                let (stdout, stderr) = self.partial_output(handle).await;
                Ok(ExecutionResult::timed_out(stdout, stderr))
            }
        }
    }

    /// Output of a killed instance, bounded by the kill grace period.
    async fn partial_output(&self, handle: &InstanceHandle) -> (String, String) {
        let grace = Duration::from_secs(self.config.engine.kill_grace_secs);
        match tokio::time::timeout(grace, self.engine.collect_output(handle)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                log::debug!("No output recovered from {}: {}", handle.name, e);
                (String::new(), String::new())
            }
            Err(_) => {
                log::debug!("Output collection for {} exceeded grace period", handle.name);
                (String::new(), String::new())
            }
        }
    }
}

/// Owns a launched instance. Dropping the guard before [`release`] has
/// completed, for instance when the caller abandons the execution future,
/// kills and removes the instance on a background task.
///
/// [`release`]: InstanceGuard::release
struct InstanceGuard<E: IsolationEngine> {
    engine: Arc<E>,
    handle: InstanceHandle,
    armed: bool,
}

impl<E: IsolationEngine> InstanceGuard<E> {
    fn new(engine: Arc<E>, handle: InstanceHandle) -> Self {
        Self {
            engine,
            handle,
            armed: true,
        }
    }

    async fn release(mut self) {
        if let Err(e) = self.engine.release(&self.handle).await {
            log::error!("Failed to remove sandbox instance {}: {}", self.handle.name, e);
        }
        self.armed = false;
    }
}

impl<E: IsolationEngine> Drop for InstanceGuard<E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let engine = self.engine.clone();
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                log::warn!(
                    "Execution abandoned, tearing down sandbox instance {}",
                    handle.name
                );
                runtime.spawn(async move {
                    if let Err(e) = engine.terminate(&handle).await {
                        log::error!("Failed to kill sandbox instance {}: {}", handle.name, e);
                    }
                    if let Err(e) = engine.release(&handle).await {
                        log::error!("Failed to remove sandbox instance {}: {}", handle.name, e);
                    }
                });
            }
            Err(_) => log::error!(
                "No runtime left to tear down sandbox instance {}; it will be swept on next start",
                handle.name
            ),
        }
    }
}

#[async_trait]
impl<E: IsolationEngine> CodeExecutor for SandboxExecutor<E> {
    async fn execute_code(
        &self,
        code: &str,
        overrides: &ResourceOverrides,
    ) -> Result<ExecutionResult, SandboxError> {
        self.execute_with_limits(code, overrides).await
    }
}
