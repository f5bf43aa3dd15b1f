//! Vision-language backend abstraction.
//!
//! The concrete backend is picked once at startup by [`select_provider`];
//! individual calls never switch backends.

pub mod mock;
pub mod openai;

use crate::models::ImageBuffer;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use mock::MockVisionProvider;
pub use openai::{OpenAiConfig, OpenAiVisionProvider};

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Empty response from backend")]
    EmptyResponse,
}

impl ProviderError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::ApiError(_) => "api_error",
            ProviderError::InvalidRequest(_) => "invalid_request",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::NetworkError(_) => "network_error",
            ProviderError::EmptyResponse => "empty_response",
        }
    }
}

/// Trait for image + prompt to text backends.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Name used in logs and the health endpoint.
    fn name(&self) -> &str;

    /// Answer `prompt` about `image`.
    async fn generate(
        &self,
        image: &ImageBuffer,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Chooses the backend for the lifetime of the process.
///
/// The fallback replaces the primary only when the primary fails its health
/// check and the fallback passes.
pub async fn select_provider(
    primary: Arc<dyn VisionProvider>,
    fallback: Option<Arc<dyn VisionProvider>>,
) -> Arc<dyn VisionProvider> {
    let primary_err = match primary.health_check().await {
        Ok(()) => {
            tracing::info!(provider = %primary.name(), "Inference backend reachable");
            return primary;
        }
        Err(e) => e,
    };

    let Some(fallback) = fallback else {
        tracing::warn!(
            provider = %primary.name(),
            error = %primary_err,
            "Inference backend unreachable and no fallback configured; keeping primary"
        );
        return primary;
    };

    match fallback.health_check().await {
        Ok(()) => {
            tracing::warn!(
                primary = %primary.name(),
                fallback = %fallback.name(),
                error = %primary_err,
                "Inference backend unreachable, switching to fallback"
            );
            fallback
        }
        Err(e) => {
            tracing::error!(
                primary = %primary.name(),
                fallback = %fallback.name(),
                error = %e,
                "Fallback backend also unreachable; keeping primary"
            );
            primary
        }
    }
}
