// Prometheus metrics for the runbox worker

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Jobs completed (language, status = success|error|timeout)
    pub static ref JOBS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("runbox_jobs_completed_total", "Total number of jobs completed"),
        &["language", "status"]
    )
    .expect("metric can be created");

    // Wall-clock time from workspace creation to teardown (ms)
    pub static ref JOB_EXECUTION_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "runbox_job_execution_time_ms",
            "Job execution time in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        &["language"]
    )
    .expect("metric can be created");

    pub static ref TEARDOWN_FAILURES: CounterVec = CounterVec::new(
        Opts::new("runbox_teardown_failures_total", "Container/workspace teardown failures"),
        &["resource"]
    )
    .expect("metric can be created");

    pub static ref ACTIVE_CONTAINERS: IntGauge = IntGauge::new(
        "runbox_active_containers",
        "Sandbox containers currently alive"
    )
    .expect("metric can be created");

    pub static ref LEASES_REQUEUED: IntCounter = IntCounter::new(
        "runbox_leases_requeued_total",
        "Expired leases handed back to the queue"
    )
    .expect("metric can be created");

    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "runbox_queue_depth",
        "Jobs waiting to be leased, sampled by the lease reaper"
    )
    .expect("metric can be created");

    pub static ref OUTPUT_TRUNCATED: IntCounter = IntCounter::new(
        "runbox_output_truncated_total",
        "Executions whose captured output hit the size cap"
    )
    .expect("metric can be created");

    pub static ref WORKER_PANICS: IntCounter = IntCounter::new(
        "runbox_worker_panics_total",
        "Executions that panicked and were reported as errors"
    )
    .expect("metric can be created");
}

/// Register every collector with [`REGISTRY`]. Call once at start-up.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(JOBS_COMPLETED.clone()))?;
    REGISTRY.register(Box::new(JOB_EXECUTION_TIME.clone()))?;
    REGISTRY.register(Box::new(TEARDOWN_FAILURES.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_CONTAINERS.clone()))?;
    REGISTRY.register(Box::new(LEASES_REQUEUED.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(OUTPUT_TRUNCATED.clone()))?;
    REGISTRY.register(Box::new(WORKER_PANICS.clone()))?;
    Ok(())
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn record_job_completed(language: &str, status: &str, execution_time_ms: f64) {
    JOBS_COMPLETED.with_label_values(&[language, status]).inc();
    JOB_EXECUTION_TIME
        .with_label_values(&[language])
        .observe(execution_time_ms);
}

pub fn record_teardown_failure(resource: &str) {
    TEARDOWN_FAILURES.with_label_values(&[resource]).inc();
}
