//! HTTP API: health, Prometheus metrics, latest tick and stress control

use crate::consumer::LatestPacket;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use sched_core::health::{components, ComponentStatus, HealthRegistry};
use sched_core::observability::SchedulerMetrics;
use sched_core::stress::{StopReport, StressHandle, StressStatus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SchedulerMetrics,
    pub latest: LatestPacket,
    pub stress: StressHandle,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: SchedulerMetrics,
        stress: StressHandle,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            latest: Arc::new(RwLock::new(None)),
            stress,
        }
    }

    pub fn with_latest(mut self, latest: LatestPacket) -> Self {
        self.latest = latest;
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    stopped: StopReport,
    status: StressStatus,
}

/// 200 while operational (degraded included), 503 when a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Latest tick packet; 204 until the first tick has been consumed
async fn snapshot(State(state): State<Arc<AppState>>) -> Response {
    match state.latest.read().await.as_ref() {
        Some(packet) => Json(packet.clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn stress_status(State(state): State<Arc<AppState>>) -> Response {
    match state.stress.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn stress_start(State(state): State<Arc<AppState>>) -> Response {
    match state.stress.start().await {
        Ok(status) => {
            info!(workers = status.workers, "Stress load requested via API");
            state.health_registry.set_healthy(components::STRESS).await;
            Json(status).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Stress start failed");
            state
                .health_registry
                .set_degraded(components::STRESS, e.to_string())
                .await;
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn stress_stop(State(state): State<Arc<AppState>>) -> Response {
    let stopped = match state.stress.stop().await {
        Ok(report) => report,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };
    match state.stress.status().await {
        Ok(status) => Json(StopResponse { stopped, status }).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/snapshot", get(snapshot))
        .route("/stress", get(stress_status))
        .route("/stress/start", post(stress_start))
        .route("/stress/stop", post(stress_stop))
        .with_state(state)
}

/// Serve the API until the shutdown signal fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
