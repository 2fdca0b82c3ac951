/// Worker Dispatcher
///
/// **Responsibility:**
/// Run N independent lease → execute → complete loops against one queue.
///
/// **Concurrency:**
/// - One job at a time per worker loop
/// - A shared semaphore caps live sandboxes across all loops; a permit is
///   taken before leasing so no job sits leased while waiting for capacity
/// - Isolation between jobs comes from per-job containers and workspaces,
///   the dispatcher holds no locks around execution
use crate::engine::JobExecutor;
use crate::metrics;
use runbox_common::queue::JobQueue;
use runbox_common::types::{ExecutionResult, Job};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct Dispatcher<Q: JobQueue + ?Sized, E: JobExecutor + ?Sized> {
    queue: Arc<Q>,
    executor: Arc<E>,
    permits: Arc<Semaphore>,
    lease_wait: Duration,
}

impl<Q: JobQueue + ?Sized, E: JobExecutor + ?Sized> Clone for Dispatcher<Q, E> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            executor: self.executor.clone(),
            permits: self.permits.clone(),
            lease_wait: self.lease_wait,
        }
    }
}

impl<Q, E> Dispatcher<Q, E>
where
    Q: JobQueue + ?Sized + 'static,
    E: JobExecutor + ?Sized,
{
    pub fn new(queue: Arc<Q>, executor: Arc<E>, max_containers: usize, lease_wait: Duration) -> Self {
        Self {
            queue,
            executor,
            permits: Arc::new(Semaphore::new(max_containers.max(1))),
            lease_wait,
        }
    }

    /// Run `workers` loops until `token` is cancelled and every in-flight job
    /// has been completed
    pub async fn run(&self, workers: usize, token: CancellationToken) {
        let mut set = JoinSet::new();
        for id in 0..workers.max(1) {
            let dispatcher = self.clone();
            let token = token.clone();
            set.spawn(async move { dispatcher.run_worker(id, token).await });
        }
        tracing::info!(workers, "Worker pool started");

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker loop aborted");
            }
        }
        tracing::info!("Worker pool has shut down");
    }

    pub async fn run_worker(&self, id: usize, token: CancellationToken) {
        tracing::info!(worker_id = id, "Worker initialized");

        while !token.is_cancelled() {
            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Bounded BLMOVE-style wait, so shutdown is noticed within lease_wait
            match self.queue.lease(self.lease_wait).await {
                Ok(Some(job)) => self.process(id, job).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker_id = id, error = %e, "Failed to lease job");
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }

            drop(permit);
        }

        tracing::info!(worker_id = id, "Worker has shut down gracefully");
    }

    async fn process(&self, worker_id: usize, job: Job) {
        let job_id = job.id;
        tracing::info!(
            worker_id,
            job_id = %job_id,
            language = %job.language,
            timeout_ms = job.timeout_ms,
            source_bytes = job.source_code.len(),
            "Leased job"
        );

        // Own task, so a panic in execution cannot take the loop down
        let executor = self.executor.clone();
        let result = match tokio::spawn(async move { executor.execute(&job).await }).await {
            Ok(result) => result,
            Err(e) => {
                metrics::WORKER_PANICS.inc();
                tracing::error!(worker_id, job_id = %job_id, error = %e, "Execution task failed");
                ExecutionResult::error("internal error: execution aborted")
                    .with_diagnostic("worker_panic")
            }
        };

        match self.queue.complete(job_id, result).await {
            Ok(true) => tracing::debug!(worker_id, job_id = %job_id, "Result published"),
            Ok(false) => {
                tracing::warn!(worker_id, job_id = %job_id, "Job already had a result, duplicate delivery ignored")
            }
            Err(e) => {
                tracing::error!(worker_id, job_id = %job_id, error = %e, "Failed to publish result")
            }
        }
    }
}

/// Periodically hand expired leases back to the queue and sample its depth
pub async fn run_reaper<Q: JobQueue + ?Sized>(
    queue: Arc<Q>,
    interval: Duration,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match queue.requeue_expired().await {
            Ok(0) => {}
            Ok(moved) => {
                metrics::LEASES_REQUEUED.inc_by(moved as u64);
                tracing::warn!(moved, "Requeued expired leases");
            }
            Err(e) => tracing::error!(error = %e, "Lease reaper failed"),
        }

        match queue.depth().await {
            Ok(depth) => metrics::QUEUE_DEPTH.set(depth as i64),
            Err(e) => tracing::warn!(error = %e, "Failed to sample queue depth"),
        }
    }
}
