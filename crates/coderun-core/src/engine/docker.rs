// src/engine/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig, HostConfigLogConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    CreateImageOptions as BollardCreateImageOptionsQuery,
    InspectContainerOptions as BollardInspectContainerOptionsQuery,
    KillContainerOptions as BollardKillContainerOptionsQuery,
    ListContainersOptionsBuilder as BollardListContainersOptionsBuilder,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::default::Default;
use uuid::Uuid;

use super::{InstanceExit, InstanceHandle, IsolationEngine, LaunchRequest};
use crate::config::NetworkPolicy;
use crate::errors::SandboxError;

/// Isolation engine backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
    pull_missing_image: bool,
}

impl DockerEngine {
    pub fn new(pull_missing_image: bool) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::EngineUnavailable(format!("Failed to connect to Docker: {}", e))
        })?;
        Ok(Self::with_client(docker, pull_missing_image))
    }

    pub fn with_client(docker: Docker, pull_missing_image: bool) -> Self {
        Self {
            docker,
            pull_missing_image,
        }
    }

    fn container_config(request: &LaunchRequest) -> ContainerCreateBody {
        let limits = &request.limits;

        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            "/tmp".to_string(),
            format!("rw,noexec,nosuid,size={}m", limits.tmpfs_size_mb),
        );

        let mut log_options = HashMap::new();
        log_options.insert("max-size".to_string(), format!("{}k", limits.output_limit_kb));
        log_options.insert("max-file".to_string(), "1".to_string());

        let host_config = HostConfig {
            binds: Some(vec![request.mount.bind_spec()]),
            nano_cpus: Some(limits.nano_cpus()),
            memory: Some(limits.memory_bytes()),
            // Equal to `memory` so the instance cannot spill into swap.
            memory_swap: Some(limits.memory_bytes()),
            pids_limit: Some(limits.pids_limit),
            network_mode: Some(request.network.network_mode().to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            readonly_rootfs: Some(true),
            tmpfs: Some(tmpfs),
            log_config: Some(HostConfigLogConfig {
                typ: Some("json-file".to_string()),
                config: Some(log_options),
            }),
            // Removal is explicit so logs can still be read after exit.
            auto_remove: Some(false),
            ..Default::default()
        };

        ContainerCreateBody {
            image: Some(request.image.clone()),
            cmd: Some(request.entrypoint.clone()),
            working_dir: Some(request.working_dir.clone()),
            user: request.user.clone(),
            labels: Some(request.labels.clone()),
            network_disabled: Some(request.network == NetworkPolicy::Disabled),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        }
    }

    async fn oom_killed(&self, handle: &InstanceHandle) -> bool {
        match self
            .docker
            .inspect_container(&handle.id, None::<BollardInspectContainerOptionsQuery>)
            .await
        {
            Ok(info) => info
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                log::debug!("Could not inspect container {}: {}", handle.name, e);
                false
            }
        }
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl IsolationEngine for DockerEngine {
    async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::EngineUnavailable(format!("Docker ping failed: {}", e)))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        if !self.pull_missing_image {
            return Err(SandboxError::launch(format!(
                "Image '{}' is not available locally and pulling is disabled",
                image
            )));
        }

        log::info!("Pulling image {}", image);
        let pull_options = Some(BollardCreateImageOptionsQuery {
            from_image: Some(image.to_string()),
            ..Default::default()
        });

        let mut pull_stream = self.docker.create_image(pull_options, None, None);
        while let Some(progress) = pull_stream.next().await {
            match progress {
                Ok(info) => log::debug!("Pulling image {}: {:?}", image, info.status),
                Err(e) => {
                    return Err(SandboxError::launch(format!(
                        "Failed to pull image '{}': {}",
                        image, e
                    )))
                }
            }
        }

        log::info!("Image {} is ready", image);
        Ok(())
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<InstanceHandle, SandboxError> {
        let name = format!("coderun-{}", Uuid::new_v4());
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(name.clone()),
            ..Default::default()
        });

        let container = self
            .docker
            .create_container(options, Self::container_config(request))
            .await
            .map_err(|e| SandboxError::launch(format!("Failed to create container: {}", e)))?;

        for warning in &container.warnings {
            log::warn!("Docker warning for {}: {}", name, warning);
        }

        let handle = InstanceHandle {
            id: container.id,
            name,
        };

        if let Err(e) = self
            .docker
            .start_container(&handle.id, None::<BollardStartContainerOptionsQuery>)
            .await
        {
            if let Err(remove_err) = self.release(&handle).await {
                log::error!(
                    "Failed to remove container {} after start failure: {}",
                    handle.name,
                    remove_err
                );
            }
            return Err(SandboxError::launch(format!(
                "Failed to start container: {}",
                e
            )));
        }

        Ok(handle)
    }

    async fn wait(&self, handle: &InstanceHandle) -> Result<InstanceExit, SandboxError> {
        // wait_container returns a stream. We need to await the next item for the result.
        let mut wait_stream = self
            .docker
            .wait_container(&handle.id, None::<BollardWaitContainerOptionsQuery>);

        let code = match wait_stream.next().await {
            Some(Ok(response)) => response.status_code,
            // Bollard reports a non-zero exit as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(SandboxError::Engine(e)),
            None => {
                return Err(SandboxError::launch(
                    "Container wait stream ended unexpectedly",
                ))
            }
        };

        Ok(InstanceExit {
            code,
            oom_killed: self.oom_killed(handle).await,
        })
    }

    async fn collect_output(&self, handle: &InstanceHandle) -> Result<(String, String), SandboxError> {
        let mut output_stream = self.docker.logs(
            &handle.id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        // Decode once at the end so multi-byte characters split across
        // frames survive.
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(log_result) = output_stream.next().await {
            match log_result? {
                LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                _ => {}
            }
        }

        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }

    async fn terminate(&self, handle: &InstanceHandle) -> Result<(), SandboxError> {
        match self
            .docker
            .kill_container(&handle.id, None::<BollardKillContainerOptionsQuery>)
            .await
        {
            Ok(()) => Ok(()),
            // Already gone or already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::Engine(e)),
        }
    }

    async fn release(&self, handle: &InstanceHandle) -> Result<(), SandboxError> {
        let options = Some(BollardRemoveContainerOptionsQuery {
            force: true,
            v: true,
            ..Default::default()
        });
        match self.docker.remove_container(&handle.id, options).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SandboxError::Engine(e)),
        }
    }

    async fn release_labelled(&self, label: &str) -> Result<usize, SandboxError> {
        let mut filters = HashMap::new();
        filters.insert("label", vec![label]);
        let options = BollardListContainersOptionsBuilder::new()
            .all(true)
            .filters(&filters)
            .build();

        let containers = self.docker.list_containers(Some(options)).await?;
        let mut removed = 0;
        for container in containers {
            let Some(id) = container.id else { continue };
            let handle = InstanceHandle {
                name: container
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone()),
                id,
            };
            match self.release(&handle).await {
                Ok(()) => {
                    log::info!("Removed leftover sandbox instance {}", handle.name);
                    removed += 1;
                }
                Err(e) => log::warn!("Could not remove leftover instance {}: {}", handle.name, e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::engine::{Mount, MANAGED_LABEL};
    use std::path::PathBuf;

    fn request(network: NetworkPolicy) -> LaunchRequest {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        LaunchRequest {
            image: "python:3.11-slim".to_string(),
            entrypoint: vec!["python".to_string(), "/app/main.py".to_string()],
            mount: Mount {
                host_path: PathBuf::from("/tmp/coderun-test"),
                container_path: "/app".to_string(),
                read_only: true,
            },
            working_dir: "/app".to_string(),
            user: Some("65534:65534".to_string()),
            limits: ResourceLimits::default(),
            network,
            labels,
        }
    }

    #[test]
    fn test_container_config_applies_reference_limits() {
        let config = DockerEngine::container_config(&request(NetworkPolicy::Disabled));
        let host = config.host_config.unwrap();

        assert_eq!(config.image.as_deref(), Some("python:3.11-slim"));
        assert_eq!(
            config.cmd,
            Some(vec!["python".to_string(), "/app/main.py".to_string()])
        );
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.binds, Some(vec!["/tmp/coderun-test:/app:ro".to_string()]));
        assert_eq!(host.auto_remove, Some(false));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(config.user.as_deref(), Some("65534:65534"));
        assert_eq!(
            config.labels.unwrap().get(MANAGED_LABEL).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_container_log_is_size_capped() {
        let mut request = request(NetworkPolicy::Disabled);
        request.limits.output_limit_kb = 256;

        let log_config = DockerEngine::container_config(&request)
            .host_config
            .unwrap()
            .log_config
            .unwrap();

        assert_eq!(log_config.typ.as_deref(), Some("json-file"));
        let options = log_config.config.unwrap();
        assert_eq!(options.get("max-size").map(String::as_str), Some("256k"));
        assert_eq!(options.get("max-file").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_network_disabled_by_default_policy() {
        let config = DockerEngine::container_config(&request(NetworkPolicy::Disabled));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(
            config.host_config.unwrap().network_mode.as_deref(),
            Some("none")
        );

        let config = DockerEngine::container_config(&request(NetworkPolicy::Bridge));
        assert_eq!(config.network_disabled, Some(false));
        assert_eq!(
            config.host_config.unwrap().network_mode.as_deref(),
            Some("bridge")
        );
    }

    #[test]
    fn test_not_found_detection() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "removal in progress".to_string(),
        };
        assert!(is_not_found(&not_found));
        assert!(!is_not_found(&conflict));
    }
}
