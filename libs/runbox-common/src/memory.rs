use crate::error::QueueError;
use crate::queue::JobQueue;
use crate::types::{ExecutionResult, Job, JobHandle, JobState};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

struct Entry {
    job: Job,
    state: JobState,
    result: Option<ExecutionResult>,
    lease_deadline: Option<Instant>,
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<Uuid>,
    entries: HashMap<Uuid, Entry>,
}

/// In-process queue with the same lease semantics as the Redis queue.
/// Used for single-process setups and tests.
///
/// Finished jobs are kept for `retention` (the in-process counterpart of
/// `RESULT_TTL_SECS`) and then forgotten, after which `poll` reports
/// `JobNotFound`.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    available: Notify,
    finished: Notify,
    lease_window: Duration,
    retention: Duration,
}

impl MemoryQueue {
    pub fn new(lease_window: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: Notify::new(),
            finished: Notify::new(),
            lease_window,
            retention: Duration::from_secs(3600),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    async fn try_lease(&self) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        while let Some(id) = inner.pending.pop_front() {
            let Some(entry) = inner.entries.get_mut(&id) else {
                continue;
            };
            if entry.state != JobState::Queued {
                continue;
            }
            entry.state = JobState::Running;
            entry.lease_deadline = Some(Instant::now() + self.lease_window);
            return Some(entry.job.clone());
        }
        None
    }

    fn evict_finished(&self, inner: &mut Inner) {
        let now = Instant::now();
        let retention = self.retention;
        inner.entries.retain(|_, entry| match entry.finished_at {
            Some(at) => now.duration_since(at) < retention,
            None => true,
        });
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError> {
        let id = job.id;
        {
            let mut inner = self.inner.lock().await;
            self.evict_finished(&mut inner);
            inner.entries.insert(
                id,
                Entry {
                    job,
                    state: JobState::Queued,
                    result: None,
                    lease_deadline: None,
                    finished_at: None,
                },
            );
            inner.pending.push_back(id);
        }
        self.available.notify_one();
        Ok(JobHandle::queued(id))
    }

    async fn lease(&self, wait: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.available.notified();
            if let Some(job) = self.try_lease().await {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, job_id: Uuid, result: ExecutionResult) -> Result<bool, QueueError> {
        let stored = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .entries
                .get_mut(&job_id)
                .ok_or(QueueError::JobNotFound(job_id))?;
            if entry.result.is_some() {
                false
            } else {
                entry.result = Some(result);
                entry.state = JobState::Finished;
                entry.lease_deadline = None;
                entry.finished_at = Some(Instant::now());
                true
            }
        };
        if stored {
            self.finished.notify_waiters();
        }
        Ok(stored)
    }

    async fn poll(&self, job_id: Uuid) -> Result<JobHandle, QueueError> {
        let inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get(&job_id)
            .ok_or(QueueError::JobNotFound(job_id))?;
        Ok(JobHandle {
            job_id,
            state: entry.state,
            result: entry.result.clone(),
        })
    }

    async fn wait(&self, job_id: Uuid, budget: Duration) -> Result<JobHandle, QueueError> {
        let deadline = Instant::now() + budget;
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let handle = self.poll(job_id).await?;
            if handle.is_finished() {
                return Ok(handle);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.poll(job_id).await;
            }
        }
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut moved = 0;
        {
            let mut inner = self.inner.lock().await;
            self.evict_finished(&mut inner);
            let expired: Vec<Uuid> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.state == JobState::Running)
                .filter(|(_, e)| e.lease_deadline.map(|d| d <= now).unwrap_or(false))
                .map(|(id, _)| *id)
                .collect();

            for id in expired {
                if let Some(entry) = inner.entries.get_mut(&id) {
                    entry.state = JobState::Queued;
                    entry.lease_deadline = None;
                }
                inner.pending.push_front(id);
                moved += 1;
            }
        }
        for _ in 0..moved {
            self.available.notify_one();
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.inner.lock().await.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionStatus;

    #[tokio::test]
    async fn test_enqueue_returns_queued_handle() {
        let queue = MemoryQueue::default();
        let job = Job::new("python", "print(2+2)", 5000);

        let handle = queue.enqueue(job.clone()).await.unwrap();

        assert_eq!(handle.job_id, job.id);
        assert_eq!(handle.state, JobState::Queued);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let queue = MemoryQueue::default();
        let job = Job::new("python", "print(2+2)", 5000);
        let id = queue.enqueue(job).await.unwrap().job_id;

        let leased = queue.lease(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(leased.id, id);
        assert_eq!(queue.poll(id).await.unwrap().state, JobState::Running);

        assert!(queue.complete(id, ExecutionResult::success("4\n")).await.unwrap());

        let handle = queue.poll(id).await.unwrap();
        assert_eq!(handle.state, JobState::Finished);
        assert_eq!(handle.result.unwrap().output, "4\n");
    }

    #[tokio::test]
    async fn test_lease_is_fifo() {
        let queue = MemoryQueue::default();
        let first = queue.enqueue(Job::new("python", "1", 1000)).await.unwrap().job_id;
        let second = queue.enqueue(Job::new("python", "2", 1000)).await.unwrap().job_id;

        let wait = Duration::from_millis(10);
        assert_eq!(queue.lease(wait).await.unwrap().unwrap().id, first);
        assert_eq!(queue.lease(wait).await.unwrap().unwrap().id, second);
        assert!(queue.lease(wait).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryQueue::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.lease(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = queue.enqueue(Job::new("cpp", "int main(){}", 1000)).await.unwrap().job_id;

        let leased = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(leased.id, id);
    }

    #[tokio::test]
    async fn test_first_result_wins() {
        let queue = MemoryQueue::default();
        let id = queue.enqueue(Job::new("python", "x", 1000)).await.unwrap().job_id;
        queue.lease(Duration::from_millis(10)).await.unwrap();

        assert!(queue.complete(id, ExecutionResult::success("first")).await.unwrap());
        assert!(!queue.complete(id, ExecutionResult::error("second")).await.unwrap());

        let result = queue.poll(id).await.unwrap().result.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "first");
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let queue = MemoryQueue::default();
        let missing = Uuid::new_v4();

        assert!(matches!(queue.poll(missing).await, Err(QueueError::JobNotFound(id)) if id == missing));
        assert!(queue.complete(missing, ExecutionResult::success("")).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::new(Duration::from_millis(20));
        let id = queue.enqueue(Job::new("python", "x", 1000)).await.unwrap().job_id;
        queue.lease(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(queue.requeue_expired().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.requeue_expired().await.unwrap(), 1);
        assert_eq!(queue.poll(id).await.unwrap().state, JobState::Queued);

        let again = queue.lease(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.id, id);
    }

    #[tokio::test]
    async fn test_finished_job_is_not_requeued() {
        let queue = MemoryQueue::new(Duration::from_millis(10));
        let id = queue.enqueue(Job::new("python", "x", 1000)).await.unwrap().job_id;
        queue.lease(Duration::from_millis(10)).await.unwrap();
        queue.complete(id, ExecutionResult::success("done")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.requeue_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_on_completion() {
        let queue = std::sync::Arc::new(MemoryQueue::default());
        let id = queue.enqueue(Job::new("python", "x", 1000)).await.unwrap().job_id;

        let completer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.complete(id, ExecutionResult::success("ok")).await
            })
        };

        let handle = queue.wait(id, Duration::from_secs(5)).await.unwrap();
        assert!(handle.is_finished());
        assert_eq!(handle.result.unwrap().output, "ok");
        completer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_budget_exhausted_is_not_failure() {
        let queue = MemoryQueue::default();
        let id = queue.enqueue(Job::new("python", "x", 1000)).await.unwrap().job_id;

        let handle = queue.wait(id, Duration::from_millis(20)).await.unwrap();

        assert_eq!(handle.state, JobState::Queued);
        assert!(handle.result.is_none());
    }

    #[tokio::test]
    async fn test_finished_jobs_expire_after_retention() {
        let queue = MemoryQueue::default().with_retention(Duration::from_millis(20));
        let old = queue.enqueue(Job::new("python", "1", 1000)).await.unwrap().job_id;
        queue.lease(Duration::from_millis(10)).await.unwrap().unwrap();
        queue.complete(old, ExecutionResult::success("1\n")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = queue.enqueue(Job::new("python", "2", 1000)).await.unwrap().job_id;

        assert!(matches!(queue.poll(old).await, Err(QueueError::JobNotFound(id)) if id == old));
        assert_eq!(queue.poll(fresh).await.unwrap().state, JobState::Queued);
    }

    #[tokio::test]
    async fn test_unfinished_jobs_are_never_evicted() {
        let queue = MemoryQueue::default().with_retention(Duration::ZERO);
        let queued = queue.enqueue(Job::new("python", "1", 1000)).await.unwrap().job_id;

        queue.enqueue(Job::new("python", "2", 1000)).await.unwrap();
        queue.requeue_expired().await.unwrap();

        assert_eq!(queue.poll(queued).await.unwrap().state, JobState::Queued);
        assert_eq!(queue.depth().await.unwrap(), 2);
    }
}
