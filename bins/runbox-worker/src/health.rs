// Health and metrics endpoints for the worker process

use crate::metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub workers: usize,
    pub max_containers: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    workers: usize,
    max_containers: usize,
    active_containers: i64,
    queue_depth: i64,
}

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// GET /health
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        workers: state.workers,
        max_containers: state.max_containers,
        active_containers: metrics::ACTIVE_CONTAINERS.get(),
        queue_depth: metrics::QUEUE_DEPTH.get(),
    })
}

/// GET /metrics - Prometheus text format
async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Serve until `token` is cancelled
pub async fn serve(port: u16, state: HealthState, token: CancellationToken) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Health/metrics server listening on {}", addr);

    axum::serve(listener, routes(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}
