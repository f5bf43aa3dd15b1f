#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vision_gateway::config::GatewayConfig;
use vision_gateway::models::{ImageBuffer, PixelFormat, VideoFrame};
use vision_gateway::services::providers::{MockVisionProvider, VisionProvider};
use vision_gateway::startup::{AppState, Application};

pub const VIDEO_OFFER: &str = "v=0\r\no=- 4611 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\na=sendonly\r\n";

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.common.host = "127.0.0.1".to_string();
    config.common.port = 0; // Random port for testing
    config.auth.secret_key = TEST_SECRET.to_string();
    config.frames.width = 8;
    config.frames.height = 8;
    config
}

pub fn frame(width: u32, height: u32) -> VideoFrame {
    VideoFrame::new(
        ImageBuffer::filled(width, height, PixelFormat::Bgr24, [40, 80, 120])
            .expect("valid test frame"),
    )
}

/// Polls `check` until it holds or five seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub state: AppState,
    pub shutdown: CancellationToken,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config(), Arc::new(MockVisionProvider::new())).await
    }

    pub async fn spawn_with(config: GatewayConfig, provider: Arc<dyn VisionProvider>) -> Self {
        let app = Application::build_with_provider(config, provider, None)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let state = app.state().clone();
        let shutdown = app.shutdown_token();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            state,
            shutdown,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
