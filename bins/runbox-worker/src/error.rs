use thiserror::Error;

/// Failures inside one sandbox execution.
///
/// Every variant is folded into a terminal `ExecutionResult` by the sandbox;
/// none of them reaches the dispatcher.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("workspace failure at {path}: {source}")]
    WorkspaceFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("container launch failed: {0}")]
    ContainerLaunchFailure(String),

    #[error("container runtime error: {0}")]
    ContainerRuntime(String),

    #[error("Time Limit Exceeded")]
    TimeLimitExceeded,

    #[error("teardown of {resource} failed: {reason}")]
    TeardownFailure { resource: String, reason: String },
}

impl SandboxError {
    /// Short stable label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::UnsupportedLanguage(_) => "unsupported_language",
            SandboxError::WorkspaceFailure { .. } => "workspace_failure",
            SandboxError::ContainerLaunchFailure(_) => "container_launch_failure",
            SandboxError::ContainerRuntime(_) => "container_runtime",
            SandboxError::TimeLimitExceeded => "timeout",
            SandboxError::TeardownFailure { .. } => "teardown_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_literal() {
        assert_eq!(SandboxError::TimeLimitExceeded.to_string(), "Time Limit Exceeded");
        assert_eq!(
            SandboxError::TimeLimitExceeded.to_string(),
            runbox_common::types::TIME_LIMIT_EXCEEDED
        );
    }

    #[test]
    fn test_kind_labels() {
        let err = SandboxError::ContainerLaunchFailure("no such image".into());
        assert_eq!(err.kind(), "container_launch_failure");
        assert!(err.to_string().contains("no such image"));
    }
}
