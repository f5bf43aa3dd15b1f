//! Media transport abstraction.
//!
//! A transport negotiates an offer/answer exchange with the client, reports
//! connection-state changes and hands out inbound tracks that yield raw
//! frames. Codec negotiation and NAT traversal live behind these traits.

pub mod loopback;
pub mod track;

use crate::models::VideoFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use track::{channel_track, ChannelTrack, FrameSink};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Descriptor rejected: {0}")]
    Rejected(String),

    #[error("Peer connection is closed")]
    Closed,

    #[error("Invalid negotiation state: {0}")]
    InvalidState(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Opaque session descriptor with its type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Notifications raised by a peer connection.
pub enum PeerEvent {
    Track(Arc<dyn MediaTrack>),
    StateChanged(PeerState),
}

/// An inbound media track.
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Next frame, or `None` once the track has ended.
    async fn recv(&self) -> Option<VideoFrame>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Event stream for this peer. Can be taken once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    fn state(&self) -> PeerState;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    fn local_description(&self) -> Option<SessionDescription>;

    /// Idempotent.
    async fn close(&self);
}

/// Factory for peer connections.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    async fn create_peer(&self, session_id: &str)
        -> Result<Arc<dyn PeerConnection>, TransportError>;
}
