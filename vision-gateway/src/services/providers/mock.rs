//! Mock provider for tests and offline runs.

use super::{ProviderError, VisionProvider};
use crate::models::ImageBuffer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Echoes the prompt back. Latency and failures are scriptable.
pub struct MockVisionProvider {
    name: String,
    latency: Duration,
    failures_left: AtomicUsize,
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MockVisionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVisionProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            latency: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `n` calls, then succeed.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionProvider for MockVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        image: &ImageBuffer,
        prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ProviderError::ApiError("scripted failure".to_string()));
        }

        Ok(format!(
            "Mock response for: {} ({}x{})",
            prompt,
            image.width(),
            image.height()
        ))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(format!(
                "{} marked unhealthy",
                self.name
            )))
        }
    }
}
