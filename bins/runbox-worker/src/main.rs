use anyhow::Context;
use runbox_common::languages::LanguageRegistry;
use runbox_common::redis::RedisJobQueue;
use runbox_worker::dispatcher::{self, Dispatcher};
use runbox_worker::health::{self, HealthState};
use runbox_worker::{metrics, DockerRuntime, Sandbox, WorkerConfig};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Runbox worker booting...");

    let config = WorkerConfig::from_env();
    metrics::init_metrics().context("Failed to register metrics")?;

    let registry = LanguageRegistry::load(config.common.language_config_path.as_deref())
        .context("Failed to load language configuration")?;
    let languages: Vec<&str> = registry.languages().collect();
    info!(?languages, "Loaded language registry");

    let queue = Arc::new(
        RedisJobQueue::connect(
            &config.common.redis_url,
            config.lease_window,
            config.common.result_ttl_secs,
        )
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.common.redis_url))?,
    );
    info!("Connected to Redis: {}", config.common.redis_url);

    let runtime = Arc::new(DockerRuntime::connect().context("Failed to connect to Docker daemon")?);

    std::fs::create_dir_all(&config.execution_root).with_context(|| {
        format!("Failed to create execution root {}", config.execution_root.display())
    })?;

    let sandbox = Arc::new(Sandbox::new(
        runtime,
        Arc::new(registry),
        config.execution_root.clone(),
        config.mount.clone(),
    ));
    sandbox.check_images().await;
    sandbox.sweep_stale().await;

    if config.concurrency > config.max_containers {
        tracing::warn!(
            workers = config.concurrency,
            max_containers = config.max_containers,
            "More workers than container permits; extra workers will idle"
        );
    }
    info!(
        workers = config.concurrency,
        max_containers = config.max_containers,
        execution_root = %config.execution_root.display(),
        mount = ?config.mount,
        "Worker configured"
    );

    let token = CancellationToken::new();

    let health_state = HealthState {
        start_time: Arc::new(Instant::now()),
        workers: config.concurrency,
        max_containers: config.max_containers,
    };
    let health_task = tokio::spawn(health::serve(config.metrics_port, health_state, token.clone()));
    let reaper_task = tokio::spawn(dispatcher::run_reaper(
        queue.clone(),
        config.reaper_interval,
        token.clone(),
    ));

    {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Received shutdown signal, finishing in-flight jobs...");
            token.cancel();
        });
    }

    let pool = Dispatcher::new(queue, sandbox, config.max_containers, config.lease_wait);
    pool.run(config.concurrency, token.clone()).await;

    token.cancel();
    reaper_task.await.ok();
    match health_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Health server failed"),
        Err(e) => tracing::error!(error = %e, "Health server task aborted"),
        Ok(Ok(())) => {}
    }

    info!("Worker shutdown complete");
    Ok(())
}
