use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Literal output reported for a job whose container exceeded its wall-clock budget.
/// Callers tracking hints/attempts match on this string, so it never changes.
pub const TIME_LIMIT_EXCEEDED: &str = "Time Limit Exceeded";

/// Job Input (Immutable)
/// A job is write-once - never mutate input fields after enqueue.
///
/// `language` is a registry identifier, not an enum: adding a language is a
/// registry row, never a new variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    pub timeout_ms: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Build a new job with a fresh id, stamped now
    pub fn new(language: impl Into<String>, source_code: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            language: language.into(),
            source_code: source_code.into(),
            timeout_ms,
            enqueued_at: Utc::now(),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Job State Machine
/// Transitions monotonically: Queued → Running → Finished.
/// A redelivered lease may move Running back to Queued, never Finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Finished,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<JobState> {
        match s {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "finished" => Some(JobState::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome kind of one execution.
///
/// `Timeout` is kept distinct internally; on the wire it is reported as
/// `error` with [`TIME_LIMIT_EXCEEDED`] as output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    /// Status as exposed to callers: only `success` or `error`
    pub fn reported(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error | ExecutionStatus::Timeout => "error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution Output
/// Produced exactly once per job by the sandbox, attached to the job's handle,
/// never mutated afterwards.
///
/// A non-zero exit of the user program is still `Success`: the captured
/// output carries the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: output.into(),
            diagnostic: None,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            output: output.into(),
            diagnostic: None,
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            output: TIME_LIMIT_EXCEEDED.to_string(),
            diagnostic: Some(format!("container exceeded {}ms wall-clock budget", timeout_ms)),
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.status == ExecutionStatus::Timeout
    }
}

/// Result Handle
/// Token returned on enqueue and refreshed by polling. Read-only to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

impl JobHandle {
    pub fn queued(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: JobState::Queued,
            result: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }
}

/// Poll response in the shape handed to the HTTP layer.
///
/// `status`/`output` are present only once the job is finished. A job still
/// queued or running after the caller's budget is "not yet known", never a
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub job_id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
}

impl From<&JobHandle> for PollResponse {
    fn from(handle: &JobHandle) -> Self {
        let result = handle.result.as_ref().filter(|_| handle.is_finished());
        Self {
            job_id: handle.job_id.to_string(),
            state: handle.state,
            status: result.map(|r| r.status.reported().to_string()),
            output: result.map(|r| r.output.clone()),
            timed_out: result.map(|r| r.is_timeout()).unwrap_or(false),
        }
    }
}
