//! Health, readiness and metrics endpoints.

use super::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Liveness check. Does not touch the ticket store.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness
    pub ready: bool,
    /// Ticket store reachable
    pub ticket_store: bool,
    /// Failure reason, when not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness check: pings the ticket store. 503 when it is unreachable.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    match state.store().health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                ticket_store: true,
                error: None,
            }),
        ),
        Err(error) => {
            tracing::warn!(%error, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    ticket_store: false,
                    error: Some(error.to_string()),
                }),
            )
        },
    }
}

/// Prometheus text exposition.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed".to_string()),
    }
}
