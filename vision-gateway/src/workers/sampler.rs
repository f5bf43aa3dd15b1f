//! Per-session frame sampling.
//!
//! Pulls frames off the session's video track, lets through at most
//! `sample_rate` frames per second and queues them for inference with the
//! session's latest question. Results come back on a per-sampler channel and
//! are forwarded to the client by [`forward_results`].

use super::dispatch::InferenceDispatchQueue;
use super::preprocess::FramePreprocessor;
use crate::config::FrameConfig;
use crate::error::GatewayError;
use crate::models::{ChatMessage, InferenceRequest, InferenceResult, OutboundMessage, Session};
use crate::transport::MediaTrack;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROMPT: &str = "What do you see in this image? Describe it briefly.";

/// Admits at most one frame per interval.
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl RateGate {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / sample_rate),
            last_accepted: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_accepted {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub frames_received: u64,
    pub frames_sampled: u64,
    pub frames_dropped: u64,
}

pub struct FrameSampler {
    session: Arc<Session>,
    track: Arc<dyn MediaTrack>,
    queue: InferenceDispatchQueue,
    preprocessor: Arc<FramePreprocessor>,
    gate: RateGate,
    frame_timeout: Duration,
    completion: mpsc::UnboundedSender<InferenceResult>,
}

impl FrameSampler {
    /// Returns the sampler and the receiving end of its result channel.
    pub fn new(
        session: Arc<Session>,
        track: Arc<dyn MediaTrack>,
        queue: InferenceDispatchQueue,
        preprocessor: Arc<FramePreprocessor>,
        config: &FrameConfig,
    ) -> (Self, mpsc::UnboundedReceiver<InferenceResult>) {
        let (completion, results) = mpsc::unbounded_channel();
        let sampler = Self {
            session,
            track,
            queue,
            preprocessor,
            gate: RateGate::new(config.sample_rate),
            frame_timeout: config.timeout(),
            completion,
        };
        (sampler, results)
    }

    /// Starts the sampling loop and its result forwarder.
    pub fn spawn(
        self,
        cancel: CancellationToken,
        results: mpsc::UnboundedReceiver<InferenceResult>,
    ) -> JoinHandle<SamplerReport> {
        let session = self.session.clone();
        tokio::spawn(forward_results(
            session.clone(),
            results,
            session.cancellation().clone(),
        ));
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) -> SamplerReport {
        let session_id = self.session.id().to_string();
        let mut report = SamplerReport::default();
        tracing::info!(
            session_id = %session_id,
            track_id = %self.track.id(),
            "Starting frame processing"
        );

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = tokio::time::timeout(self.frame_timeout, self.track.recv()) => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!(session_id = %session_id, "Track ended");
                    break;
                }
                Err(_) => {
                    let err = GatewayError::TransportTimeout(self.frame_timeout);
                    tracing::warn!(session_id = %session_id, error = %err, "Frame timeout");
                    continue;
                }
            };
            report.frames_received += 1;

            if !self.gate.admit(Instant::now()) {
                continue;
            }
            self.session.record_frame();

            let preprocessor = self.preprocessor.clone();
            let processed =
                tokio::task::spawn_blocking(move || preprocessor.process(&frame.image)).await;
            let image = match processed {
                Ok(Ok(image)) => image,
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping malformed frame");
                    continue;
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Preprocessing task failed");
                    continue;
                }
            };
            let prompt = self
                .session
                .latest_user_prompt()
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string());

            let request =
                InferenceRequest::new(&session_id, image, prompt, self.completion.clone());
            match self.queue.enqueue(request) {
                Ok(()) => {
                    report.frames_sampled += 1;
                    tracing::debug!(
                        session_id = %session_id,
                        frames_sampled = report.frames_sampled,
                        frames_received = report.frames_received,
                        "Sampled frame"
                    );
                }
                Err(GatewayError::QueueFull) => report.frames_dropped += 1,
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %e,
                        "Inference queue unavailable"
                    );
                    break;
                }
            }
        }

        tracing::info!(
            session_id = %session_id,
            frames_received = report.frames_received,
            frames_sampled = report.frames_sampled,
            frames_dropped = report.frames_dropped,
            "Stopped frame processing"
        );
        report
    }
}

/// Delivers inference results to the session's client and chat log.
pub async fn forward_results(
    session: Arc<Session>,
    mut results: mpsc::UnboundedReceiver<InferenceResult>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = results.recv() => match result {
                Some(result) => result,
                None => break,
            },
        };

        session.push_chat(ChatMessage::assistant_text(result.text.clone()));

        match session.delivery() {
            Some(delivery) => {
                if delivery.push(OutboundMessage::from(result)).await {
                    tracing::debug!(session_id = %session.id(), "Sent response to client");
                } else {
                    tracing::debug!(
                        session_id = %session.id(),
                        "Client channel gone, response kept in history"
                    );
                }
            }
            None => {
                tracing::warn!(session_id = %session.id(), "No chat channel for session");
            }
        }
    }
}
