use runbox_common::config::{parse_or, Config};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;

use crate::limits::{CPU_PERIOD_US, CPU_QUOTA_US, MEMORY_LIMIT_BYTES};

/// Where the worker writes workspaces and how containers see them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// Bind-mount this host path (must match the worker's own view)
    Bind(PathBuf),
    /// Mount a named Docker volume shared with the worker container
    Volume(String),
}

/// Worker configuration
/// Shared settings come from [`Config`]; the rest is worker-only
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub common: Config,
    pub execution_root: PathBuf,
    pub mount: MountSource,
    pub concurrency: usize,
    pub max_containers: usize,
    pub lease_window: Duration,
    pub lease_wait: Duration,
    pub reaper_interval: Duration,
    pub metrics_port: u16,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok(), host_container_capacity)
    }

    /// Build from any key lookup. `capacity` is only consulted when
    /// `MAX_CONTAINERS` is unset.
    pub fn from_lookup(
        get: impl Fn(&str) -> Option<String>,
        capacity: impl FnOnce() -> usize,
    ) -> Self {
        let common = Config::from_lookup(&get);

        let execution_root = PathBuf::from(
            get("CODE_EXECUTION_PATH").unwrap_or_else(|| "/tmp/code-execution".to_string()),
        );
        let mount = match get("CODE_VOLUME_NAME") {
            Some(name) if !name.is_empty() => MountSource::Volume(name),
            _ => MountSource::Bind(execution_root.clone()),
        };

        let max_containers = match get("MAX_CONTAINERS").and_then(|v| v.parse::<usize>().ok()) {
            Some(max) => max,
            None => capacity(),
        }
        .max(1);
        let concurrency = parse_or(get("WORKER_CONCURRENCY"), max_containers).max(1);
        let lease_window_ms = parse_or(get("LEASE_WINDOW_MS"), common.max_timeout_ms + 30_000);

        Self {
            execution_root,
            mount,
            concurrency,
            max_containers,
            lease_window: Duration::from_millis(lease_window_ms),
            lease_wait: Duration::from_secs(5),
            reaper_interval: Duration::from_millis(parse_or(get("REAPER_INTERVAL_MS"), 5000)),
            metrics_port: parse_or(get("METRICS_PORT"), 9090),
            common,
        }
    }
}

/// How many sandboxes this host can run at once.
///
/// Bounded by CPU (each container gets half a core) and by 75% of available
/// memory divided by the per-container ceiling. Never below 1.
pub fn host_container_capacity() -> usize {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    let cpus = sys.cpus().len().max(1) as u64;
    let by_cpu = cpus * CPU_PERIOD_US as u64 / CPU_QUOTA_US as u64;
    let by_memory = sys.available_memory() / 4 * 3 / MEMORY_LIMIT_BYTES as u64;

    capacity_from(by_cpu, by_memory)
}

fn capacity_from(by_cpu: u64, by_memory: u64) -> usize {
    by_cpu.min(by_memory).max(1) as usize
}
