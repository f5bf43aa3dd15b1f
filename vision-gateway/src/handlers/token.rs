use crate::services::auth::TokenResponse;
use crate::startup::AppState;
use axum::{extract::State, Json};
use service_core::error::AppError;

/// Issues an ephemeral token for a fresh anonymous session.
pub async fn create_token(State(state): State<AppState>) -> Result<Json<TokenResponse>, AppError> {
    let token = state
        .tokens
        .issue_session_token()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to issue token: {}", e)))?;
    Ok(Json(token))
}
