//! Per-client session state.

use super::chat::{ChatMessage, ChatRole};
use super::messages::OutboundMessage;
use crate::transport::PeerConnection;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Weak reference to a client's outbound channel.
///
/// The chat connection owns the sender; the session only borrows it, so a
/// session never keeps a disconnected client's channel alive.
#[derive(Clone)]
pub struct DeliveryHandle {
    tx: mpsc::WeakSender<OutboundMessage>,
    closed: CancellationToken,
}

impl DeliveryHandle {
    pub fn new(tx: &mpsc::Sender<OutboundMessage>, closed: CancellationToken) -> Self {
        Self {
            tx: tx.downgrade(),
            closed,
        }
    }

    /// Returns false when the owning connection is gone.
    pub async fn push(&self, message: OutboundMessage) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Asks the owning connection to shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_channel(&self, tx: &mpsc::Sender<OutboundMessage>) -> bool {
        self.tx.upgrade().is_some_and(|own| own.same_channel(tx))
    }
}

struct SessionState {
    last_activity: Instant,
    chat_history: Vec<ChatMessage>,
    transport: Option<Arc<dyn PeerConnection>>,
    delivery: Option<DeliveryHandle>,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    frames_processed: AtomicU64,
    active: AtomicBool,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("frames_processed", &self.frames_processed())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            frames_processed: AtomicU64::new(0),
            active: AtomicBool::new(true),
            cancel,
            state: Mutex::new(SessionState {
                last_activity: Instant::now(),
                chat_history: Vec::new(),
                transport: None,
                delivery: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touch(&self) {
        self.lock().last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Counts an accepted frame and refreshes activity.
    pub fn record_frame(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn push_chat(&self, message: ChatMessage) {
        let mut state = self.lock();
        state.last_activity = Instant::now();
        state.chat_history.push(message);
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.lock().chat_history.clone()
    }

    pub fn latest_user_prompt(&self) -> Option<String> {
        self.lock()
            .chat_history
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
    }

    pub fn attach_transport(&self, peer: Arc<dyn PeerConnection>) {
        self.lock().transport = Some(peer);
    }

    pub fn take_transport(&self) -> Option<Arc<dyn PeerConnection>> {
        self.lock().transport.take()
    }

    pub fn attach_delivery(&self, handle: DeliveryHandle) {
        let previous = self.lock().delivery.replace(handle);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Detaches the delivery channel if it is still `tx`.
    pub fn detach_delivery(&self, tx: &mpsc::Sender<OutboundMessage>) {
        let mut state = self.lock();
        if state.delivery.as_ref().is_some_and(|d| d.is_channel(tx)) {
            state.delivery = None;
        }
    }

    pub fn delivery(&self) -> Option<DeliveryHandle> {
        self.lock().delivery.clone()
    }

    /// Token cancelled when the session is torn down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Common teardown for every removal path. Safe to call twice.
    pub async fn teardown(&self) {
        self.set_active(false);
        self.cancel.cancel();

        let (transport, delivery) = {
            let mut state = self.lock();
            (state.transport.take(), state.delivery.take())
        };
        if let Some(peer) = transport {
            peer.close().await;
        }
        if let Some(delivery) = delivery {
            delivery.close();
        }
    }
}
