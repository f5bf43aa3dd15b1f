use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "vision-gateway",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Liveness plus the registry and queue counters.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    Json(json!({
        "status": "healthy",
        "inference_ready": !state.shutdown.is_cancelled(),
        "backend": state.provider.name(),
        "sessions": snapshot.sessions,
        "inference": snapshot.inference,
    }))
}

/// Ready once the selected backend answers its health check.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.provider.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Backend not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
