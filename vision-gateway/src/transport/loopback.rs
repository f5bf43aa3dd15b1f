//! In-process transport.
//!
//! Answers any well-formed offer and exposes a video track when the offer
//! carries an `m=video` section. Frames are fed through a [`FrameSink`]
//! obtained from [`LoopbackTransport::frame_sink`].

use super::{
    channel_track, FrameSink, PeerConnection, PeerEvent, PeerState, SdpType, SessionDescription,
    TransportError, TransportProvider,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

const TRACK_BUFFER: usize = 30;

#[derive(Default)]
pub struct LoopbackTransport {
    peers: DashMap<String, Arc<LoopbackPeer>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink feeding the video track of the session's peer, once negotiated.
    pub fn frame_sink(&self, session_id: &str) -> Option<FrameSink> {
        let peer = self.peer(session_id)?;
        let sink = peer.lock().sink.clone();
        sink
    }

    pub fn peer(&self, session_id: &str) -> Option<Arc<LoopbackPeer>> {
        self.peers.get(session_id).map(|p| p.value().clone())
    }
}

#[async_trait]
impl TransportProvider for LoopbackTransport {
    async fn create_peer(
        &self,
        session_id: &str,
    ) -> Result<Arc<dyn PeerConnection>, TransportError> {
        self.peers.retain(|_, peer| peer.state() != PeerState::Closed);

        let peer = Arc::new(LoopbackPeer::new(session_id));
        self.peers.insert(session_id.to_string(), peer.clone());
        tracing::debug!(session_id = %session_id, "Loopback peer created");
        Ok(peer)
    }
}

struct PeerInner {
    state: PeerState,
    remote: Option<SessionDescription>,
    local: Option<SessionDescription>,
    sink: Option<FrameSink>,
    track_announced: bool,
}

pub struct LoopbackPeer {
    session_id: String,
    inner: Mutex<PeerInner>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl LoopbackPeer {
    fn new(session_id: &str) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session_id: session_id.to_string(),
            inner: Mutex::new(PeerInner {
                state: PeerState::New,
                remote: None,
                local: None,
                sink: None,
                track_announced: false,
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PeerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PeerEvent) {
        // Nobody listening is fine.
        let _ = self.events_tx.send(event);
    }

    /// Simulates a connectivity failure.
    pub fn fail(&self) {
        {
            let mut inner = self.lock();
            if inner.state == PeerState::Closed {
                return;
            }
            inner.state = PeerState::Failed;
            inner.sink = None;
        }
        tracing::warn!(session_id = %self.session_id, "Loopback peer failed");
        self.emit(PeerEvent::StateChanged(PeerState::Failed));
    }
}

fn has_video(sdp: &str) -> bool {
    sdp.lines().any(|line| line.trim_start().starts_with("m=video"))
}

fn build_answer(offer: &str) -> String {
    let mut answer = String::from("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
    for line in offer.lines().map(str::trim).filter(|l| l.starts_with("m=")) {
        answer.push_str(line);
        answer.push_str("\r\na=recvonly\r\n");
    }
    answer
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn state(&self) -> PeerState {
        self.lock().state
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        if desc.sdp_type != SdpType::Offer {
            return Err(TransportError::Rejected(format!(
                "expected offer, got {:?}",
                desc.sdp_type
            )));
        }
        if !desc.sdp.trim_start().starts_with("v=0") {
            return Err(TransportError::Rejected(
                "descriptor must start with v=0".to_string(),
            ));
        }

        let changed = {
            let mut inner = self.lock();
            match inner.state {
                PeerState::Closed | PeerState::Failed => return Err(TransportError::Closed),
                _ => {}
            }
            inner.remote = Some(desc);
            let changed = inner.state == PeerState::New;
            if changed {
                inner.state = PeerState::Connecting;
            }
            changed
        };
        if changed {
            self.emit(PeerEvent::StateChanged(PeerState::Connecting));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let inner = self.lock();
        let remote = inner.remote.as_ref().ok_or_else(|| {
            TransportError::InvalidState("no remote description set".to_string())
        })?;
        Ok(SessionDescription::answer(build_answer(&remote.sdp)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        if desc.sdp_type != SdpType::Answer {
            return Err(TransportError::InvalidState(
                "local description must be an answer".to_string(),
            ));
        }

        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if matches!(inner.state, PeerState::Closed | PeerState::Failed) {
                return Err(TransportError::Closed);
            }
            let video = inner.remote.as_ref().map(|r| has_video(&r.sdp)).ok_or_else(|| {
                TransportError::InvalidState("no remote description set".to_string())
            })?;
            inner.local = Some(desc);

            if inner.state != PeerState::Connected {
                inner.state = PeerState::Connected;
                events.push(PeerEvent::StateChanged(PeerState::Connected));
            }
            if video && !inner.track_announced {
                let (track, sink) =
                    channel_track(format!("{}-video", self.session_id), TRACK_BUFFER);
                inner.sink = Some(sink);
                inner.track_announced = true;
                events.push(PeerEvent::Track(track));
            }
        }
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.lock().local.clone()
    }

    async fn close(&self) {
        {
            let mut inner = self.lock();
            if inner.state == PeerState::Closed {
                return;
            }
            inner.state = PeerState::Closed;
            inner.sink = None;
        }
        tracing::debug!(session_id = %self.session_id, "Loopback peer closed");
        self.emit(PeerEvent::StateChanged(PeerState::Closed));
    }
}
