use super::frame::ImageBuffer;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Text delivered when the backend call fails.
pub const APOLOGY_TEXT: &str = "Sorry, I encountered an error processing your request.";

/// One unit of work for the dispatch worker.
#[derive(Debug)]
pub struct InferenceRequest {
    pub session_id: String,
    pub image: ImageBuffer,
    pub prompt: String,
    pub enqueued_at: Instant,
    /// Where the result goes. Owned by the sampler of the originating session.
    pub completion: mpsc::UnboundedSender<InferenceResult>,
}

impl InferenceRequest {
    pub fn new(
        session_id: impl Into<String>,
        image: ImageBuffer,
        prompt: impl Into<String>,
        completion: mpsc::UnboundedSender<InferenceResult>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            image,
            prompt: prompt.into(),
            enqueued_at: Instant::now(),
            completion,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub text: String,
    /// Seconds spent inside the backend call.
    pub inference_time: f64,
    pub error: bool,
}

impl InferenceResult {
    pub fn success(text: String, inference_time: f64) -> Self {
        Self {
            text,
            inference_time,
            error: false,
        }
    }

    pub fn failure(inference_time: f64) -> Self {
        Self {
            text: APOLOGY_TEXT.to_string(),
            inference_time,
            error: true,
        }
    }
}
