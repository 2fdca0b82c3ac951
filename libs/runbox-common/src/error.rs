use thiserror::Error;
use uuid::Uuid;

/// Failures of the job queue backend
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to (de)serialize queue payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job {0} not found (unknown or past its retention window)")]
    JobNotFound(Uuid),

    #[error("corrupt state for job {job_id}: {value}")]
    CorruptState { job_id: Uuid, value: String },
}

/// Failures loading the language registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read language config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse language config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("language profile '{0}' is missing the {{workspace}} placeholder in its command")]
    MissingPlaceholder(String),
}

/// Caller-facing failures of submit/poll
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid timeout {requested_ms}ms (must be between 1 and {max_ms}ms)")]
    InvalidTimeout { requested_ms: u64, max_ms: u64 },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_language_message() {
        let err = ClientError::UnsupportedLanguage("ruby".to_string());
        assert_eq!(err.to_string(), "Unsupported language: ruby");
    }

    #[test]
    fn test_invalid_timeout_message() {
        let err = ClientError::InvalidTimeout {
            requested_ms: 60_000,
            max_ms: 30_000,
        };
        assert!(err.to_string().contains("60000ms"));
    }
}
