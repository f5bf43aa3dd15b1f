use super::{MediaTrack, TrackKind, TransportError};
use crate::models::VideoFrame;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Track backed by an in-process channel.
pub struct ChannelTrack {
    id: String,
    kind: TrackKind,
    rx: Mutex<mpsc::Receiver<VideoFrame>>,
}

/// Producer side of a [`ChannelTrack`]. Dropping every sink ends the track.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<VideoFrame>,
}

pub fn channel_track(id: impl Into<String>, capacity: usize) -> (Arc<ChannelTrack>, FrameSink) {
    let (tx, rx) = mpsc::channel(capacity);
    let track = Arc::new(ChannelTrack {
        id: id.into(),
        kind: TrackKind::Video,
        rx: Mutex::new(rx),
    });
    (track, FrameSink { tx })
}

impl FrameSink {
    /// Waits for room in the track buffer.
    pub async fn send(&self, frame: VideoFrame) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Pushes without waiting; a full buffer drops the frame like a live
    /// camera would.
    pub fn try_push(&self, frame: VideoFrame) -> Result<bool, TransportError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl MediaTrack for ChannelTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn recv(&self) -> Option<VideoFrame> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageBuffer, PixelFormat};

    fn frame() -> VideoFrame {
        VideoFrame::new(ImageBuffer::filled(2, 2, PixelFormat::Bgr24, [0, 0, 0]).unwrap())
    }

    #[tokio::test]
    async fn test_track_ends_when_sinks_dropped() {
        let (track, sink) = channel_track("cam", 1);
        assert!(sink.try_push(frame()).unwrap());
        assert!(!sink.try_push(frame()).unwrap());
        drop(sink);

        assert!(track.recv().await.is_some());
        assert!(track.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_push_after_track_dropped_fails() {
        let (track, sink) = channel_track("cam", 1);
        drop(track);
        assert_eq!(sink.try_push(frame()), Err(TransportError::Closed));
    }
}
