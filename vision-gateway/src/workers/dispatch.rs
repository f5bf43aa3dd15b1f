//! Bounded FIFO feeding the single inference worker.
//!
//! Producers never wait: a full queue rejects the request on the spot. One
//! worker drains the queue for the whole process, so backend calls are
//! strictly sequential.

use crate::error::GatewayError;
use crate::models::{InferenceRequest, InferenceResult};
use crate::services::providers::VisionProvider;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct DispatchStats {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    latency_micros: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_inference_time: f64,
    pub avg_inference_time: f64,
    pub queue_size: usize,
    pub frames_dropped: u64,
}

/// Producer handle to the dispatch queue. Cheap to clone.
#[derive(Clone)]
pub struct InferenceDispatchQueue {
    tx: mpsc::Sender<InferenceRequest>,
    stats: Arc<DispatchStats>,
    capacity: usize,
}

impl InferenceDispatchQueue {
    /// Creates the queue and the receiver for its single consumer.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InferenceRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            stats: Arc::new(DispatchStats::default()),
            capacity: capacity.max(1),
        };
        (queue, rx)
    }

    /// Non-blocking enqueue. A full queue drops the request and counts it.
    pub fn enqueue(&self, request: InferenceRequest) -> Result<(), GatewayError> {
        match self.tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(request)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped").increment(1);
                tracing::warn!(
                    session_id = %request.session_id,
                    "Frame dropped - inference queue full"
                );
                Err(GatewayError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(GatewayError::QueueClosed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        let successful = self.stats.successful.load(Ordering::Relaxed);
        let total_inference_time =
            self.stats.latency_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let avg_inference_time = if successful > 0 {
            total_inference_time / successful as f64
        } else {
            0.0
        };

        DispatchStatsSnapshot {
            total_requests: self.stats.total.load(Ordering::Relaxed),
            successful_requests: successful,
            failed_requests: self.stats.failed.load(Ordering::Relaxed),
            total_inference_time,
            avg_inference_time,
            queue_size: self.depth(),
            frames_dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

/// The one consumer of the dispatch queue.
pub struct DispatchWorker {
    rx: mpsc::Receiver<InferenceRequest>,
    provider: Arc<dyn VisionProvider>,
    stats: Arc<DispatchStats>,
    max_tokens: u32,
}

impl DispatchWorker {
    pub fn new(
        queue: &InferenceDispatchQueue,
        rx: mpsc::Receiver<InferenceRequest>,
        provider: Arc<dyn VisionProvider>,
        max_tokens: u32,
    ) -> Self {
        Self {
            rx,
            provider,
            stats: queue.stats.clone(),
            max_tokens,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(provider = %self.provider.name(), "Inference worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Inference worker shutting down");
                    break;
                }
                request = self.rx.recv() => {
                    match request {
                        Some(request) => {
                            if !self.process(request, &shutdown).await {
                                break;
                            }
                        }
                        None => {
                            tracing::info!("Queue closed, inference worker exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Runs one request to completion. Returns false if shutdown interrupted it.
    async fn process(&self, request: InferenceRequest, shutdown: &CancellationToken) -> bool {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            session_id = %request.session_id,
            queue_wait_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "Processing inference request"
        );

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = self.provider.generate(&request.image, &request.prompt, self.max_tokens) => Some(result),
        };
        let elapsed = start.elapsed();

        let (result, keep_running) = match outcome {
            Some(Ok(text)) => {
                self.stats.successful.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .latency_micros
                    .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                metrics::counter!("inference_requests", "outcome" => "success").increment(1);
                metrics::histogram!("inference_latency_seconds").record(elapsed.as_secs_f64());
                tracing::info!(
                    session_id = %request.session_id,
                    inference_ms = elapsed.as_millis() as u64,
                    "Inference completed"
                );
                (InferenceResult::success(text, elapsed.as_secs_f64()), true)
            }
            Some(Err(e)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("inference_requests", "outcome" => "failure", "error" => e.kind())
                    .increment(1);
                tracing::error!(
                    session_id = %request.session_id,
                    error = %e,
                    "Inference failed"
                );
                (InferenceResult::failure(elapsed.as_secs_f64()), true)
            }
            None => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    session_id = %request.session_id,
                    "Inference interrupted by shutdown"
                );
                (InferenceResult::failure(elapsed.as_secs_f64()), false)
            }
        };

        if request.completion.send(result).is_err() {
            tracing::debug!(
                session_id = %request.session_id,
                "Result receiver gone, discarding"
            );
        }
        keep_running
    }
}
