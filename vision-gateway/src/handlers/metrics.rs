use crate::services::metrics::get_metrics;
use crate::startup::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    if !state.config.enable_metrics {
        return StatusCode::NOT_FOUND.into_response();
    }

    state.metrics.publish();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
        .into_response()
}
