//! Error type for the gateway core and its mapping onto HTTP responses.

use crate::services::auth::AuthError;
use crate::transport::TransportError;
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Maximum concurrent sessions ({max}) reached")]
    CapacityExceeded { max: usize },

    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    #[error("Inference queue is full")]
    QueueFull,

    #[error("Inference queue is closed")]
    QueueClosed,

    #[error("No frame received within {0:?}")]
    TransportTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Unauthorized(#[from] AuthError),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::CapacityExceeded { .. } => AppError::ServiceUnavailable(err.to_string()),
            GatewayError::InvalidOffer(_) => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            GatewayError::Transport(_) => AppError::BadGateway(err.to_string()),
            GatewayError::Unauthorized(_) => AppError::Unauthorized(anyhow::anyhow!(err.to_string())),
            GatewayError::QueueFull | GatewayError::QueueClosed => {
                AppError::ServiceUnavailable(err.to_string())
            }
            GatewayError::TransportTimeout(_) => AppError::InternalError(anyhow::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_maps_to_http_status() {
        let cases = [
            (
                GatewayError::CapacityExceeded { max: 2 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GatewayError::InvalidOffer("empty sdp".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                GatewayError::Transport(TransportError::Rejected("bad".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                GatewayError::Unauthorized(AuthError::MissingCredentials),
                StatusCode::UNAUTHORIZED,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }
}
