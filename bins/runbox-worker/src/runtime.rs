/// Container Runtime Seam
///
/// **Core Responsibility:**
/// Describe one sandbox container and drive its lifecycle through a runtime
/// handle that is constructed once in `main` and passed down.
///
/// **Boundary:**
/// - The runtime knows HOW to create/start/wait/kill/remove containers
/// - It does NOT know about jobs, queues, or result semantics
/// - The sandbox decides what a timeout or a failure means
use crate::config::MountSource;
use crate::error::SandboxError;
use crate::limits::{
    CPU_PERIOD_US, CPU_QUOTA_US, MEMORY_LIMIT_BYTES, MEMORY_SWAP_BYTES, PIDS_LIMIT,
};
use crate::metrics;
use async_trait::async_trait;
use runbox_common::languages::{LanguageProfile, CONTAINER_MOUNT_PATH};
use std::sync::Arc;
use uuid::Uuid;

/// Everything needed to create one sandbox container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// `source:target:ro` bind/volume specification
    pub bind: String,
    pub memory_bytes: i64,
    pub memory_swap_bytes: i64,
    pub cpu_period_us: i64,
    pub cpu_quota_us: i64,
    pub pids_limit: i64,
    pub network_disabled: bool,
    pub job_id: Uuid,
}

impl ContainerSpec {
    /// Container for `job_id` running `profile`, with the fixed isolation limits
    pub fn for_job(job_id: Uuid, profile: &LanguageProfile, mount: &MountSource) -> Self {
        let source = match mount {
            MountSource::Bind(path) => path.display().to_string(),
            MountSource::Volume(name) => name.clone(),
        };
        let workspace_dir = format!("{}/{}", CONTAINER_MOUNT_PATH, job_id);

        Self {
            name: format!("runbox-{}", job_id),
            image: profile.image.clone(),
            cmd: profile.render_command(&workspace_dir),
            bind: format!("{}:{}:ro", source, CONTAINER_MOUNT_PATH),
            memory_bytes: MEMORY_LIMIT_BYTES,
            memory_swap_bytes: MEMORY_SWAP_BYTES,
            cpu_period_us: CPU_PERIOD_US,
            cpu_quota_us: CPU_QUOTA_US,
            pids_limit: PIDS_LIMIT,
            network_disabled: true,
            job_id,
        }
    }
}

/// Container runtime operations used by the sandbox.
///
/// `wait` returns the exit code once the container stops; a non-zero code
/// is a normal completion, not an error.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;
    async fn start(&self, id: &str) -> Result<(), SandboxError>;
    async fn wait(&self, id: &str) -> Result<i64, SandboxError>;
    /// Combined stdout and stderr in emission order, at most `limit` bytes
    async fn logs(&self, id: &str, limit: usize) -> Result<CapturedOutput, SandboxError>;
    async fn kill(&self, id: &str) -> Result<(), SandboxError>;
    /// Force-remove, whatever the container's state
    async fn remove(&self, id: &str) -> Result<(), SandboxError>;
    async fn image_exists(&self, image: &str) -> bool;
    /// Ids of every container carrying the runbox label, running or not
    async fn list_managed(&self) -> Result<Vec<String>, SandboxError>;
}

/// Output captured from one container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    /// The program wrote more than the cap; `text` holds the first `limit` bytes
    pub truncated: bool,
}

/// Accumulates log chunks up to a byte cap
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append `chunk`. Returns `false` once the cap is reached and the rest
    /// of the stream should be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    pub fn finish(self) -> CapturedOutput {
        CapturedOutput {
            text: String::from_utf8_lossy(&self.bytes).into_owned(),
            truncated: self.truncated,
        }
    }
}

/// Owns a created container until it is removed.
///
/// `release` removes it explicitly. If the guard is dropped without release
/// (panic, cancelled future) removal is spawned on the current tokio runtime.
pub struct ContainerGuard<R: ContainerRuntime + ?Sized> {
    runtime: Arc<R>,
    id: Option<String>,
}

impl<R: ContainerRuntime + ?Sized> ContainerGuard<R> {
    pub fn new(runtime: Arc<R>, id: String) -> Self {
        metrics::ACTIVE_CONTAINERS.inc();
        Self {
            runtime,
            id: Some(id),
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub async fn release(mut self) -> Result<(), SandboxError> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        metrics::ACTIVE_CONTAINERS.dec();
        self.runtime.remove(&id).await.map_err(|e| {
            metrics::record_teardown_failure("container");
            SandboxError::TeardownFailure {
                resource: format!("container {}", id),
                reason: e.to_string(),
            }
        })
    }
}

impl<R: ContainerRuntime + ?Sized> Drop for ContainerGuard<R> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        metrics::ACTIVE_CONTAINERS.dec();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        metrics::record_teardown_failure("container");
                        tracing::warn!(container_id = %id, error = %e, "Deferred container removal failed");
                    } else {
                        tracing::debug!(container_id = %id, "Removed container after abnormal exit");
                    }
                });
            }
            Err(_) => {
                metrics::record_teardown_failure("container");
                tracing::error!(container_id = %id, "No async runtime to remove container, it was leaked");
            }
        }
    }
}
