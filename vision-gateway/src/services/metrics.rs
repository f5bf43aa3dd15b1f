//! Metrics collection and Prometheus export.
//!
//! The recorder is installed once at startup; [`MetricsAggregator`] copies
//! registry and queue counters into gauges right before each render.

use super::registry::{SessionRegistry, SessionStats};
use crate::workers::{DispatchStatsSnapshot, InferenceDispatchQueue};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::{Arc, OnceLock};

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder. Later calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    if METRICS_HANDLE.set(handle).is_err() {
        tracing::debug!("Metrics recorder already initialized");
    }
    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GatewayMetrics {
    pub sessions: SessionStats,
    pub inference: DispatchStatsSnapshot,
}

/// Read-only view over registry and queue counters.
#[derive(Clone)]
pub struct MetricsAggregator {
    registry: Arc<SessionRegistry>,
    queue: InferenceDispatchQueue,
}

impl MetricsAggregator {
    pub fn new(registry: Arc<SessionRegistry>, queue: InferenceDispatchQueue) -> Self {
        Self { registry, queue }
    }

    pub fn snapshot(&self) -> GatewayMetrics {
        GatewayMetrics {
            sessions: self.registry.stats(),
            inference: self.queue.stats(),
        }
    }

    /// Writes the current snapshot into process gauges.
    pub fn publish(&self) -> GatewayMetrics {
        let snapshot = self.snapshot();
        let sessions = &snapshot.sessions;
        let inference = &snapshot.inference;

        metrics::gauge!("sessions_total").set(sessions.total_sessions as f64);
        metrics::gauge!("sessions_active").set(sessions.active_sessions as f64);
        metrics::gauge!("frames_processed_total").set(sessions.total_frames_processed as f64);
        metrics::gauge!("inference_requests_total").set(inference.total_requests as f64);
        metrics::gauge!("inference_requests_successful").set(inference.successful_requests as f64);
        metrics::gauge!("inference_requests_failed").set(inference.failed_requests as f64);
        metrics::gauge!("inference_time_avg_seconds").set(inference.avg_inference_time);
        metrics::gauge!("inference_queue_depth").set(inference.queue_size as f64);
        metrics::gauge!("frames_dropped_total").set(inference.frames_dropped as f64);

        snapshot
    }
}
