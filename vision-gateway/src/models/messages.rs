//! JSON payloads exchanged on the chat channel.

use super::inference::InferenceResult;
use serde::{Deserialize, Serialize};

/// Messages pushed from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Response {
        text: String,
        inference_time: f64,
        error: bool,
    },
    Ack {
        message: String,
    },
    Pong,
    Error {
        message: String,
    },
}

impl From<InferenceResult> for OutboundMessage {
    fn from(result: InferenceResult) -> Self {
        OutboundMessage::Response {
            text: result.text,
            inference_time: result.inference_time,
            error: result.error,
        }
    }
}

/// Messages received from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Chat { content: String },
    Ping,
}
