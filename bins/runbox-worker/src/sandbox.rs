/// Sandbox Executor
///
/// Runs one job in one ephemeral container:
/// 1. Create `<root>/<job id>/` and write the source file
/// 2. Create and start a network-less container with the fixed limits,
///    the execution root mounted read-only
/// 3. Wait up to the job's timeout; past it, kill and report
///    "Time Limit Exceeded"
/// 4. On exit (any exit code) capture combined stdout/stderr
/// 5. Remove the container, then the source file and directory
///
/// Every step returns `Result<_, SandboxError>`; the public entry point folds
/// errors into a terminal result. Teardown failures are logged and counted,
/// never written over the result.
use crate::config::MountSource;
use crate::engine::JobExecutor;
use crate::error::SandboxError;
use crate::metrics;
use crate::runtime::{ContainerGuard, ContainerRuntime, ContainerSpec};
use crate::limits::MAX_OUTPUT_BYTES;
use crate::workspace::{self, Workspace};
use async_trait::async_trait;
use runbox_common::languages::LanguageRegistry;
use runbox_common::types::{ExecutionResult, Job};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Sandbox<R: ContainerRuntime + ?Sized> {
    runtime: Arc<R>,
    registry: Arc<LanguageRegistry>,
    root: PathBuf,
    mount: MountSource,
    output_limit: usize,
}

impl<R: ContainerRuntime + ?Sized> Sandbox<R> {
    pub fn new(
        runtime: Arc<R>,
        registry: Arc<LanguageRegistry>,
        root: PathBuf,
        mount: MountSource,
    ) -> Self {
        Self {
            runtime,
            registry,
            root,
            mount,
            output_limit: MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    /// Remove containers and workspaces left by a worker that died mid-job.
    ///
    /// Call once before leasing starts. Assumes one worker process per Docker
    /// host and execution root.
    pub async fn sweep_stale(&self) -> usize {
        let mut removed = 0;

        match self.runtime.list_managed().await {
            Ok(ids) => {
                for id in ids {
                    match self.runtime.remove(&id).await {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            metrics::record_teardown_failure("container");
                            tracing::warn!(container_id = %id, error = %e, "Failed to remove stale container");
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Could not list stale containers"),
        }

        match workspace::sweep_stale(&self.root) {
            Ok(dirs) => removed += dirs,
            Err(e) => tracing::warn!(error = %e, "Could not sweep stale workspaces"),
        }

        if removed > 0 {
            tracing::warn!(removed, "Removed resources left by a previous worker");
        }
        removed
    }

    /// Warn about registry images the runtime does not have
    pub async fn check_images(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for profile in self.registry.profiles() {
            if !self.runtime.image_exists(&profile.image).await {
                tracing::warn!(
                    language = %profile.name,
                    image = %profile.image,
                    "Image not present, jobs for this language will fail to launch"
                );
                missing.push(profile.image.clone());
            }
        }
        missing
    }

    pub async fn run(&self, job: &Job) -> ExecutionResult {
        let started = Instant::now();

        let result = match self.run_steps(job).await {
            Ok(result) => result,
            Err(SandboxError::TimeLimitExceeded) => {
                tracing::info!(job_id = %job.id, timeout_ms = job.timeout_ms, "Time limit exceeded");
                ExecutionResult::timeout(job.timeout_ms)
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, kind = e.kind(), error = %e, "Execution failed");
                ExecutionResult::error(e.to_string()).with_diagnostic(e.kind())
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_job_completed(&job.language, result.status.as_str(), elapsed_ms);
        tracing::info!(
            job_id = %job.id,
            language = %job.language,
            status = %result.status,
            elapsed_ms = elapsed_ms as u64,
            output_bytes = result.output.len(),
            "Execution finished"
        );

        result
    }

    async fn run_steps(&self, job: &Job) -> Result<ExecutionResult, SandboxError> {
        let profile = self
            .registry
            .profile_for(&job.language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(job.language.clone()))?;

        let workspace = Workspace::create(&self.root, job.id, &profile.source_file, &job.source_code)?;
        let spec = ContainerSpec::for_job(job.id, profile, &self.mount);

        let outcome = self.run_container(&spec, job.timeout()).await;

        // Container is gone by now; the workspace goes last
        drop(workspace);
        outcome
    }

    async fn run_container(
        &self,
        spec: &ContainerSpec,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        let id = self.runtime.create(spec).await?;
        let container = ContainerGuard::new(self.runtime.clone(), id);
        tracing::debug!(job_id = %spec.job_id, container_id = %container.id(), image = %spec.image, "Container created");

        let outcome = self.supervise(&container, timeout).await;

        if let Err(e) = container.release().await {
            tracing::warn!(job_id = %spec.job_id, error = %e, "Container teardown failed");
        }
        outcome
    }

    async fn supervise(
        &self,
        container: &ContainerGuard<R>,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        let id = container.id();
        self.runtime.start(id).await?;

        match tokio::time::timeout(timeout, self.runtime.wait(id)).await {
            Ok(Ok(exit_code)) => {
                tracing::debug!(container_id = %id, exit_code, "Container exited");
                let captured = self.runtime.logs(id, self.output_limit).await?;
                let result = ExecutionResult::success(captured.text);
                if captured.truncated {
                    metrics::OUTPUT_TRUNCATED.inc();
                    tracing::info!(container_id = %id, limit = self.output_limit, "Output truncated");
                    return Ok(result.with_diagnostic("output_truncated"));
                }
                Ok(result)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if let Err(e) = self.runtime.kill(id).await {
                    // Force removal still follows
                    tracing::warn!(container_id = %id, error = %e, "Kill after timeout failed");
                }
                Err(SandboxError::TimeLimitExceeded)
            }
        }
    }
}

#[async_trait]
impl<R: ContainerRuntime + ?Sized> JobExecutor for Sandbox<R> {
    async fn execute(&self, job: &Job) -> ExecutionResult {
        self.run(job).await
    }
}
