//! Offer/answer negotiation and peer lifecycle per session.
//!
//! Each session has at most one tracked peer, moving through
//! `NEW -> NEGOTIATING -> CONNECTED -> CLOSING -> CLOSED`. The first inbound
//! video track of a peer starts that session's [`FrameSampler`]. Closing a
//! peer marks the session inactive but leaves the record to the registry.

use crate::config::FrameConfig;
use crate::error::GatewayError;
use crate::models::Session;
use crate::services::registry::SessionRegistry;
use crate::transport::{
    MediaTrack, PeerConnection, PeerEvent, PeerState, SdpType, SessionDescription, TrackKind,
    TransportError, TransportProvider,
};
use crate::workers::{FramePreprocessor, FrameSampler, InferenceDispatchQueue};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalingState {
    New,
    Negotiating,
    Connected,
    Closing,
    Closed,
}

impl SignalingState {
    fn is_live(self) -> bool {
        matches!(self, SignalingState::Negotiating | SignalingState::Connected)
    }
}

struct PeerSlot {
    peer: Arc<dyn PeerConnection>,
    session: Arc<Session>,
    state: SignalingState,
    sampler: CancellationToken,
    generation: u64,
}

pub struct SignalingController {
    registry: Arc<SessionRegistry>,
    transport: Arc<dyn TransportProvider>,
    queue: InferenceDispatchQueue,
    preprocessor: Arc<FramePreprocessor>,
    frames: FrameConfig,
    slots: Mutex<HashMap<String, PeerSlot>>,
    generation: AtomicU64,
}

impl SignalingController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transport: Arc<dyn TransportProvider>,
        queue: InferenceDispatchQueue,
        preprocessor: Arc<FramePreprocessor>,
        frames: FrameConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            queue,
            preprocessor,
            frames,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PeerSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, session_id: &str) -> SignalingState {
        self.lock()
            .get(session_id)
            .map(|slot| slot.state)
            .unwrap_or(SignalingState::New)
    }

    /// Negotiates `offer` for the session and returns the local answer.
    pub async fn handle_offer(
        self: &Arc<Self>,
        session_id: &str,
        offer: SessionDescription,
    ) -> Result<SessionDescription, GatewayError> {
        if offer.sdp_type != SdpType::Offer {
            return Err(GatewayError::InvalidOffer(format!(
                "expected type offer, got {:?}",
                offer.sdp_type
            )));
        }
        if offer.sdp.trim().is_empty() {
            return Err(GatewayError::InvalidOffer("sdp is empty".to_string()));
        }

        tracing::info!(session_id = %session_id, "Handling offer");
        let session = self.registry.get_or_create(session_id).await?;

        let (peer, generation) = match self.reuse_live_peer(session_id) {
            Some(live) => {
                tracing::info!(session_id = %session_id, "Renegotiating on live peer");
                live
            }
            None => self.open_peer(session_id, &session).await?,
        };

        match negotiate(peer.as_ref(), offer).await {
            Ok(answer) => {
                self.set_state(session_id, generation, SignalingState::Connected);
                session.set_active(true);
                tracing::info!(session_id = %session_id, "Created answer");
                Ok(answer)
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Negotiation failed");
                self.close_peer(session_id, generation).await;
                Err(GatewayError::Transport(e))
            }
        }
    }

    fn reuse_live_peer(&self, session_id: &str) -> Option<(Arc<dyn PeerConnection>, u64)> {
        let mut slots = self.lock();
        let slot = slots.get_mut(session_id)?;
        let peer_alive = !matches!(slot.peer.state(), PeerState::Closed | PeerState::Failed);
        if slot.state.is_live() && peer_alive {
            slot.state = SignalingState::Negotiating;
            Some((slot.peer.clone(), slot.generation))
        } else {
            None
        }
    }

    async fn open_peer(
        self: &Arc<Self>,
        session_id: &str,
        session: &Arc<Session>,
    ) -> Result<(Arc<dyn PeerConnection>, u64), GatewayError> {
        let peer = self.transport.create_peer(session_id).await?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let sampler = session.cancellation().child_token();

        let previous = self.lock().insert(
            session_id.to_string(),
            PeerSlot {
                peer: peer.clone(),
                session: session.clone(),
                state: SignalingState::Negotiating,
                sampler: sampler.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.sampler.cancel();
            previous.peer.close().await;
        }
        session.attach_transport(peer.clone());

        match peer.take_events() {
            Some(events) => {
                tokio::spawn(self.clone().handle_events(
                    session.clone(),
                    generation,
                    events,
                    sampler,
                ));
            }
            None => tracing::warn!(session_id = %session_id, "Peer exposes no event stream"),
        }

        Ok((peer, generation))
    }

    fn set_state(&self, session_id: &str, generation: u64, state: SignalingState) {
        if let Some(slot) = self.lock().get_mut(session_id) {
            if slot.generation == generation {
                slot.state = state;
            }
        }
    }

    async fn handle_events(
        self: Arc<Self>,
        session: Arc<Session>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
        sampler: CancellationToken,
    ) {
        let session_id = session.id().to_string();
        let session_cancel = session.cancellation().clone();
        let mut sampling = false;

        loop {
            let event = tokio::select! {
                _ = session_cancel.cancelled() => {
                    self.forget(&session_id, generation);
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                PeerEvent::Track(track) => {
                    tracing::info!(
                        session_id = %session_id,
                        track_id = %track.id(),
                        kind = ?track.kind(),
                        "Track received"
                    );
                    if track.kind() == TrackKind::Video && !sampling {
                        sampling = true;
                        self.start_sampler(&session, track, sampler.clone());
                    }
                }
                PeerEvent::StateChanged(state) => {
                    tracing::info!(
                        session_id = %session_id,
                        state = ?state,
                        "Connection state changed"
                    );
                    if matches!(state, PeerState::Failed | PeerState::Closed) {
                        self.close_peer(&session_id, generation).await;
                    }
                }
            }
        }
    }

    fn start_sampler(
        &self,
        session: &Arc<Session>,
        track: Arc<dyn MediaTrack>,
        cancel: CancellationToken,
    ) {
        let (sampler, results) = FrameSampler::new(
            session.clone(),
            track,
            self.queue.clone(),
            self.preprocessor.clone(),
            &self.frames,
        );
        sampler.spawn(cancel, results);
    }

    /// Tears the peer down. Stale generations and repeated calls are no-ops.
    async fn close_peer(&self, session_id: &str, generation: u64) {
        let closing = {
            let mut slots = self.lock();
            match slots.get_mut(session_id) {
                Some(slot)
                    if slot.generation == generation
                        && !matches!(slot.state, SignalingState::Closing | SignalingState::Closed) =>
                {
                    slot.state = SignalingState::Closing;
                    Some((slot.peer.clone(), slot.session.clone(), slot.sampler.clone()))
                }
                _ => None,
            }
        };
        let Some((peer, session, sampler)) = closing else {
            return;
        };

        sampler.cancel();
        peer.close().await;
        session.take_transport();
        session.set_active(false);

        self.set_state(session_id, generation, SignalingState::Closed);
        tracing::info!(session_id = %session_id, "Closed peer connection");
    }

    fn forget(&self, session_id: &str, generation: u64) {
        let mut slots = self.lock();
        if slots
            .get(session_id)
            .is_some_and(|slot| slot.generation == generation)
        {
            slots.remove(session_id);
        }
    }

    /// Force-closes every tracked peer. Used at shutdown.
    pub async fn close_all(&self) {
        let tracked: Vec<(String, u64)> = self
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.generation))
            .collect();

        for (session_id, generation) in tracked {
            self.close_peer(&session_id, generation).await;
        }
        tracing::info!("All peer connections closed");
    }
}

async fn negotiate(
    peer: &dyn PeerConnection,
    offer: SessionDescription,
) -> Result<SessionDescription, TransportError> {
    peer.set_remote_description(offer).await?;
    let answer = peer.create_answer().await?;
    peer.set_local_description(answer.clone()).await?;
    Ok(peer.local_description().unwrap_or(answer))
}
