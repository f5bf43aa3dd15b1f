//! Offer handling and peer lifecycle against the loopback transport.

mod common;

use common::{wait_until, VIDEO_OFFER};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vision_gateway::config::{FrameConfig, SessionConfig};
use vision_gateway::error::GatewayError;
use vision_gateway::models::{DeliveryHandle, OutboundMessage};
use vision_gateway::services::providers::MockVisionProvider;
use vision_gateway::services::SessionRegistry;
use vision_gateway::signaling::{SignalingController, SignalingState};
use vision_gateway::transport::{
    LoopbackTransport, PeerConnection, PeerState, SdpType, SessionDescription, TransportError,
};
use vision_gateway::workers::{DispatchWorker, FramePreprocessor, InferenceDispatchQueue, DEFAULT_PROMPT};

struct Gateway {
    registry: Arc<SessionRegistry>,
    loopback: Arc<LoopbackTransport>,
    queue: InferenceDispatchQueue,
    signaling: Arc<SignalingController>,
    shutdown: CancellationToken,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn gateway(max_sessions: usize) -> Gateway {
    let shutdown = CancellationToken::new();
    let registry = Arc::new(SessionRegistry::new(
        &SessionConfig {
            max_sessions,
            ..SessionConfig::default()
        },
        shutdown.clone(),
    ));
    let frames = FrameConfig {
        sample_rate: 100.0,
        width: 8,
        height: 8,
        ..FrameConfig::default()
    };
    let (queue, rx) = InferenceDispatchQueue::new(frames.queue_size);
    DispatchWorker::new(&queue, rx, Arc::new(MockVisionProvider::new()), 64)
        .spawn(shutdown.child_token());

    let loopback = Arc::new(LoopbackTransport::new());
    let signaling = Arc::new(SignalingController::new(
        registry.clone(),
        loopback.clone(),
        queue.clone(),
        Arc::new(FramePreprocessor::new(frames.width, frames.height)),
        frames,
    ));

    Gateway {
        registry,
        loopback,
        queue,
        signaling,
        shutdown,
    }
}

#[tokio::test]
async fn offer_to_answer_to_response() {
    let gw = gateway(4);

    let answer = gw
        .signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();
    assert_eq!(answer.sdp_type, SdpType::Answer);
    assert!(answer.sdp.contains("m=video"));
    assert_eq!(gw.signaling.state("s1"), SignalingState::Connected);

    let session = gw.registry.get("s1").unwrap();
    assert!(session.is_active());
    let (client_tx, mut client_rx) = mpsc::channel(8);
    session.attach_delivery(DeliveryHandle::new(&client_tx, CancellationToken::new()));

    let sink = gw.loopback.frame_sink("s1").expect("video track negotiated");
    sink.send(common::frame(32, 24)).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), client_rx.recv())
        .await
        .expect("no response delivered")
        .unwrap();
    match delivered {
        OutboundMessage::Response { text, error, .. } => {
            assert!(!error);
            assert_eq!(text, format!("Mock response for: {} (8x8)", DEFAULT_PROMPT));
        }
        other => panic!("unexpected message: {:?}", other),
    }

    let inference = gw.queue.stats();
    assert_eq!(
        inference.total_requests,
        inference.successful_requests + inference.failed_requests
    );
    assert_eq!(gw.registry.stats().total_frames_processed, 1);
}

#[tokio::test]
async fn invalid_offers_create_nothing() {
    let gw = gateway(4);

    let empty = gw
        .signaling
        .handle_offer("s1", SessionDescription::offer("  "))
        .await;
    assert!(matches!(empty, Err(GatewayError::InvalidOffer(_))));

    let answer_typed = gw
        .signaling
        .handle_offer("s1", SessionDescription::answer(VIDEO_OFFER))
        .await;
    assert!(matches!(answer_typed, Err(GatewayError::InvalidOffer(_))));

    assert_eq!(gw.signaling.state("s1"), SignalingState::New);
    assert!(gw.registry.get("s1").is_none());
}

#[tokio::test]
async fn rejected_descriptor_closes_peer() {
    let gw = gateway(4);

    let result = gw
        .signaling
        .handle_offer("s1", SessionDescription::offer("not sdp"))
        .await;
    assert!(matches!(
        result,
        Err(GatewayError::Transport(TransportError::Rejected(_)))
    ));
    assert_eq!(gw.signaling.state("s1"), SignalingState::Closed);

    let session = gw.registry.get("s1").expect("session is kept");
    assert!(!session.is_active());
}

#[tokio::test]
async fn peer_failure_marks_session_inactive() {
    let gw = gateway(4);
    gw.signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();

    gw.loopback.peer("s1").unwrap().fail();

    let signaling = gw.signaling.clone();
    assert!(wait_until(|| {
        let signaling = signaling.clone();
        async move { signaling.state("s1") == SignalingState::Closed }
    })
    .await);

    let session = gw.registry.get("s1").expect("record stays registered");
    assert!(!session.is_active());
    assert_eq!(gw.loopback.peer("s1").unwrap().state(), PeerState::Closed);
}

#[tokio::test]
async fn renegotiation_reuses_live_peer() {
    let gw = gateway(4);
    gw.signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();
    let first = gw.loopback.peer("s1").unwrap();

    gw.signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();
    let second = gw.loopback.peer("s1").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(gw.signaling.state("s1"), SignalingState::Connected);
}

#[tokio::test]
async fn offer_after_close_opens_new_peer() {
    let gw = gateway(4);
    gw.signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();
    let first = gw.loopback.peer("s1").unwrap();
    first.fail();

    let signaling = gw.signaling.clone();
    assert!(wait_until(|| {
        let signaling = signaling.clone();
        async move { signaling.state("s1") == SignalingState::Closed }
    })
    .await);

    gw.signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();
    let second = gw.loopback.peer("s1").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(gw.registry.get("s1").unwrap().is_active());
}

#[tokio::test]
async fn removing_session_closes_its_peer() {
    let gw = gateway(4);
    gw.signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();
    let peer = gw.loopback.peer("s1").unwrap();

    assert!(gw.registry.remove("s1").await);
    assert_eq!(peer.state(), PeerState::Closed);

    let signaling = gw.signaling.clone();
    assert!(wait_until(|| {
        let signaling = signaling.clone();
        async move { signaling.state("s1") == SignalingState::New }
    })
    .await);
}

#[tokio::test]
async fn capacity_applies_to_offers() {
    let gw = gateway(1);
    gw.signaling
        .handle_offer("s1", SessionDescription::offer(VIDEO_OFFER))
        .await
        .unwrap();

    let second = gw
        .signaling
        .handle_offer("s2", SessionDescription::offer(VIDEO_OFFER))
        .await;
    assert!(matches!(
        second,
        Err(GatewayError::CapacityExceeded { max: 1 })
    ));
}

#[tokio::test]
async fn close_all_closes_every_peer() {
    let gw = gateway(4);
    for id in ["s1", "s2"] {
        gw.signaling
            .handle_offer(id, SessionDescription::offer(VIDEO_OFFER))
            .await
            .unwrap();
    }

    gw.signaling.close_all().await;

    for id in ["s1", "s2"] {
        assert_eq!(gw.signaling.state(id), SignalingState::Closed);
        assert_eq!(gw.loopback.peer(id).unwrap().state(), PeerState::Closed);
        assert!(!gw.registry.get(id).unwrap().is_active());
    }
}
