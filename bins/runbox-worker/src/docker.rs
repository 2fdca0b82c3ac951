// Docker container management using Bollard

use crate::error::SandboxError;
use crate::runtime::{CapturedOutput, ContainerRuntime, ContainerSpec, OutputBuffer};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;

/// Label put on every sandbox container so leftovers can be found after a crash
pub const MANAGED_LABEL: &str = "runbox.managed";

/// Docker-backed runtime.
///
/// Holds one `Docker` client for the life of the process; clones share the
/// underlying connection pool.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, BollardError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let labels = HashMap::from([
            ("runbox.job_id".to_string(), spec.job_id.to_string()),
            (MANAGED_LABEL.to_string(), "true".to_string()),
        ]);

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(spec.network_disabled),
            labels: Some(labels),
            host_config: Some(HostConfig {
                binds: Some(vec![spec.bind.clone()]),
                memory: Some(spec.memory_bytes),
                memory_swap: Some(spec.memory_swap_bytes),
                cpu_period: Some(spec.cpu_period_us),
                cpu_quota: Some(spec.cpu_quota_us),
                pids_limit: Some(spec.pids_limit),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        // A previous attempt at this job may have died before removing its container
        self.remove(&spec.name).await?;

        let container = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| SandboxError::ContainerLaunchFailure(e.to_string()))?;

        for warning in &container.warnings {
            tracing::warn!(container_id = %container.id, warning = %warning, "Docker create warning");
        }

        Ok(container.id)
    }

    async fn start(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::ContainerLaunchFailure(e.to_string()))
    }

    async fn wait(&self, id: &str) -> Result<i64, SandboxError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard surfaces a non-zero exit as an error; it is still a completion
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::ContainerRuntime(e.to_string())),
            None => Ok(0),
        }
    }

    async fn logs(&self, id: &str, limit: usize) -> Result<CapturedOutput, SandboxError> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut buffer = OutputBuffer::new(limit);
        let mut stream = self.docker.logs(id, options);
        while let Some(chunk) = stream.next().await {
            let more = match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => buffer.push(&message),
                Ok(LogOutput::StdIn { .. }) => true,
                Err(e) => return Err(SandboxError::ContainerRuntime(e.to_string())),
            };
            // Dropping the stream closes the request; the rest is never read
            if !more {
                break;
            }
        }

        Ok(buffer.finish())
    }

    async fn kill(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::ContainerRuntime(e.to_string()))
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already gone counts as removed
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(SandboxError::ContainerRuntime(e.to_string())),
        }
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn list_managed(&self) -> Result<Vec<String>, SandboxError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(
                "label".to_string(),
                vec![format!("{}=true", MANAGED_LABEL)],
            )]),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| SandboxError::ContainerRuntime(e.to_string()))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}
