//! Application startup and lifecycle management.
//!
//! Builds the shared services once, starts the inference worker and the
//! session sweeper under one shutdown token, and serves the HTTP surface.

use crate::config::GatewayConfig;
use crate::handlers;
use crate::services::providers::{
    select_provider, MockVisionProvider, OpenAiConfig, OpenAiVisionProvider, VisionProvider,
};
use crate::services::{MetricsAggregator, SessionRegistry, TokenService};
use crate::signaling::SignalingController;
use crate::transport::{LoopbackTransport, TransportProvider};
use crate::workers::{DispatchWorker, FaceDetector, FramePreprocessor, InferenceDispatchQueue};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<SessionRegistry>,
    pub queue: InferenceDispatchQueue,
    pub signaling: Arc<SignalingController>,
    pub loopback: Arc<LoopbackTransport>,
    pub tokens: TokenService,
    pub metrics: MetricsAggregator,
    pub provider: Arc<dyn VisionProvider>,
    pub shutdown: CancellationToken,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    worker: JoinHandle<()>,
}

fn backend_from(
    config: &GatewayConfig,
    api_base: &str,
) -> Result<Arc<dyn VisionProvider>, AppError> {
    let provider = OpenAiVisionProvider::new(OpenAiConfig {
        api_base: api_base.to_string(),
        model: config.backend.model.clone(),
        api_key: config.backend.api_key.clone(),
        timeout: config.backend.timeout(),
    })
    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    Ok(Arc::new(provider))
}

impl Application {
    /// Build the application with the given configuration.
    ///
    /// The inference backend is selected here, once.
    pub async fn build(config: GatewayConfig) -> Result<Self, AppError> {
        let primary = backend_from(&config, &config.backend.api_base)?;
        let fallback: Option<Arc<dyn VisionProvider>> = match config.backend.fallback.as_deref() {
            None => None,
            Some("mock") => Some(Arc::new(MockVisionProvider::new())),
            Some(url) => Some(backend_from(&config, url)?),
        };
        let provider = select_provider(primary, fallback).await;

        Self::build_with_provider(config, provider, None).await
    }

    /// Build with an explicit backend and optional face detector.
    pub async fn build_with_provider(
        config: GatewayConfig,
        provider: Arc<dyn VisionProvider>,
        face_detector: Option<Arc<dyn FaceDetector>>,
    ) -> Result<Self, AppError> {
        let shutdown = CancellationToken::new();

        let (queue, rx) = InferenceDispatchQueue::new(config.frames.queue_size);
        let worker = DispatchWorker::new(&queue, rx, provider.clone(), config.backend.max_tokens)
            .spawn(shutdown.child_token());

        let registry = Arc::new(SessionRegistry::new(&config.sessions, shutdown.clone()));
        registry.start();

        let mut preprocessor = FramePreprocessor::new(config.frames.width, config.frames.height);
        match face_detector {
            Some(detector) if config.frames.enable_face_blur => {
                preprocessor = preprocessor.with_face_detector(detector);
            }
            None if config.frames.enable_face_blur => {
                tracing::warn!(
                    "Face blur enabled but no face detector available; frames are not redacted"
                );
            }
            _ => {}
        }

        let loopback = Arc::new(LoopbackTransport::new());
        let transport: Arc<dyn TransportProvider> = loopback.clone();
        let signaling = Arc::new(SignalingController::new(
            registry.clone(),
            transport,
            queue.clone(),
            Arc::new(preprocessor),
            config.frames.clone(),
        ));

        let metrics = MetricsAggregator::new(registry.clone(), queue.clone());
        let tokens = TokenService::new(&config.auth);

        let listener = TcpListener::bind(config.common.bind_address())
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to bind HTTP listener to {}: {}",
                    config.common.bind_address(),
                    e
                );
                AppError::from(e)
            })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            backend = %provider.name(),
            max_sessions = config.sessions.max_sessions,
            queue_size = config.frames.queue_size,
            sample_rate = config.frames.sample_rate,
            "Vision gateway initialized"
        );

        let state = AppState {
            config,
            registry,
            queue,
            signaling,
            loopback,
            tokens,
            metrics,
            provider,
            shutdown,
        };

        Ok(Self {
            port,
            listener,
            state,
            worker,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Run the application until the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state.clone());
        let shutdown = self.state.shutdown.clone();

        let served = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        tracing::info!("Shutting down service...");
        self.state.shutdown.cancel();
        self.state.signaling.close_all().await;
        self.state.registry.shutdown().await;
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Inference worker panicked");
        }
        tracing::info!("Service shutdown complete");

        served
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/api/token", post(handlers::create_token))
        .route("/api/webrtc/offer", post(handlers::webrtc_offer))
        .route("/ws/:session_id", get(handlers::chat_socket))
        .route("/upload", post(handlers::upload_disabled))
        .route("/api/upload", post(handlers::upload_disabled))
        .route("/api/image/upload", post(handlers::upload_disabled))
        .route("/api/video/upload", post(handlers::upload_disabled))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
