//! Per-container isolation limits.
//!
//! Identical for every language and every job; callers cannot change them.

/// 128 MiB memory ceiling
pub const MEMORY_LIMIT_BYTES: i64 = 128 * 1024 * 1024;

/// Swap ceiling equal to memory: no swap on top of the memory limit
pub const MEMORY_SWAP_BYTES: i64 = MEMORY_LIMIT_BYTES;

/// CFS period/quota giving half of one core
pub const CPU_PERIOD_US: i64 = 100_000;
pub const CPU_QUOTA_US: i64 = 50_000;

/// Process/thread ceiling
pub const PIDS_LIMIT: i64 = 64;

/// Captured stdout+stderr kept per job; the rest is dropped unread
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;
