pub mod client;
pub mod config;
pub mod error;
pub mod languages;
pub mod memory;
pub mod queue;
pub mod redis;
pub mod types;

// Re-export commonly used types for convenience
pub use client::Submitter;
pub use config::Config;
pub use error::{ClientError, QueueError, RegistryError};
pub use languages::{LanguageProfile, LanguageRegistry};
pub use memory::MemoryQueue;
pub use queue::JobQueue;
pub use crate::redis::RedisJobQueue;
pub use types::{ExecutionResult, ExecutionStatus, Job, JobHandle, JobState, PollResponse};
