use crate::error::QueueError;
use crate::types::{ExecutionResult, Job, JobHandle};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Job Queue contract shared by the caller facade and the worker dispatcher.
///
/// The queue knows nothing about languages or sandboxes. Delivery is
/// at-least-once: a lease not completed within the lease window is handed
/// out again by [`JobQueue::requeue_expired`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist the job and return its handle in state `queued`. Never blocks on execution.
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError>;

    /// Claim the next job, waiting at most `wait` for one to appear.
    /// Leased jobs move to state `running`.
    async fn lease(&self, wait: Duration) -> Result<Option<Job>, QueueError>;

    /// Attach the terminal result and flip the handle to `finished`.
    ///
    /// Returns `false` if a result was already attached; the first result wins.
    async fn complete(&self, job_id: Uuid, result: ExecutionResult) -> Result<bool, QueueError>;

    /// Current handle of a job
    async fn poll(&self, job_id: Uuid) -> Result<JobHandle, QueueError>;

    /// Block until the job finishes or `budget` elapses, then return its handle.
    /// An unfinished handle after the budget means "not yet known".
    async fn wait(&self, job_id: Uuid, budget: Duration) -> Result<JobHandle, QueueError>;

    /// Hand leases past their deadline back to the queue. Returns how many moved.
    async fn requeue_expired(&self) -> Result<usize, QueueError>;

    /// Number of jobs waiting to be leased
    async fn depth(&self) -> Result<usize, QueueError>;
}
