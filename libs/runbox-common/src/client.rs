use crate::config::Config;
use crate::error::ClientError;
use crate::languages::LanguageRegistry;
use crate::queue::JobQueue;
use crate::types::{ExecutionResult, Job, PollResponse};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Caller-facing entry point used by the HTTP layer and the CLI.
///
/// Validates a submission against the registry before anything is enqueued,
/// so an unsupported language never reaches a worker.
pub struct Submitter<Q: JobQueue + ?Sized> {
    queue: Arc<Q>,
    registry: Arc<LanguageRegistry>,
    default_timeout_ms: u64,
    max_timeout_ms: u64,
    poll_margin_ms: u64,
}

impl<Q: JobQueue + ?Sized> Submitter<Q> {
    pub fn new(queue: Arc<Q>, registry: Arc<LanguageRegistry>, config: &Config) -> Self {
        Self {
            queue,
            registry,
            default_timeout_ms: config.default_timeout_ms,
            max_timeout_ms: config.max_timeout_ms,
            poll_margin_ms: config.poll_margin_ms,
        }
    }

    /// Requested timeout in ms; saturates so oversized values stay oversized
    fn timeout_ms(&self, timeout: Option<Duration>) -> u64 {
        timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(self.default_timeout_ms)
    }

    /// Enqueue `code` for execution and return the job id immediately
    pub async fn submit(
        &self,
        code: &str,
        language: &str,
        timeout: Option<Duration>,
    ) -> Result<Uuid, ClientError> {
        if !self.registry.is_supported(language) {
            tracing::info!(language, "Rejected submission for unsupported language");
            return Err(ClientError::UnsupportedLanguage(language.to_string()));
        }

        let timeout_ms = self.timeout_ms(timeout);
        if timeout_ms == 0 || timeout_ms > self.max_timeout_ms {
            return Err(ClientError::InvalidTimeout {
                requested_ms: timeout_ms,
                max_ms: self.max_timeout_ms,
            });
        }

        let job = Job::new(language, code, timeout_ms);
        let handle = self.queue.enqueue(job).await?;

        tracing::info!(
            job_id = %handle.job_id,
            language,
            timeout_ms,
            source_bytes = code.len(),
            "Job queued"
        );

        Ok(handle.job_id)
    }

    pub async fn poll(&self, job_id: Uuid) -> Result<PollResponse, ClientError> {
        let handle = self.queue.poll(job_id).await?;
        Ok(PollResponse::from(&handle))
    }

    /// Block for up to `budget` waiting for the job to finish
    pub async fn wait(&self, job_id: Uuid, budget: Duration) -> Result<PollResponse, ClientError> {
        let handle = self.queue.wait(job_id, budget).await?;
        Ok(PollResponse::from(&handle))
    }

    /// Submit and wait with a budget derived from the job's own timeout.
    ///
    /// The budget is `timeout + poll margin`, so the caller never gives up
    /// before the sandbox itself would have timed out.
    pub async fn run(
        &self,
        code: &str,
        language: &str,
        timeout: Option<Duration>,
    ) -> Result<PollResponse, ClientError> {
        let job_id = self.submit(code, language, timeout).await?;
        let timeout_ms = self.timeout_ms(timeout);
        let budget = Duration::from_millis(timeout_ms.saturating_add(self.poll_margin_ms));
        self.wait(job_id, budget).await
    }
}

impl ClientError {
    /// Terminal result to report for errors decided at submission time
    pub fn as_result(&self) -> Option<ExecutionResult> {
        match self {
            ClientError::UnsupportedLanguage(_) | ClientError::InvalidTimeout { .. } => {
                Some(ExecutionResult::error(self.to_string()))
            }
            ClientError::Queue(_) => None,
        }
    }
}
