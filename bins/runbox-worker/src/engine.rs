/// Execution Engine - Abstraction for Job Execution
///
/// **Core Responsibility:**
/// Turn one leased job into exactly one terminal `ExecutionResult`.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker sandbox, fakes in tests)
/// - Engine does NOT know about the queue, leases, or completion
/// - Engine never returns an error: every failure is already a result
///
/// The dispatcher only depends on this trait, so the sandbox can be swapped
/// without touching the lease → execute → complete loop.
use async_trait::async_trait;
use runbox_common::types::{ExecutionResult, Job};

#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: &Job) -> ExecutionResult;
}
