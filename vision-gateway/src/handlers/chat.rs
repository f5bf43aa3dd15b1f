//! WebSocket chat channel.
//!
//! Text frames carry JSON chat/ping messages. Binary frames carry encoded
//! stills that are fed to the session's video track, for clients that
//! stream snapshots instead of negotiating media.

use crate::models::{
    ChatMessage, DeliveryHandle, InboundMessage, OutboundMessage, Session, VideoFrame,
};
use crate::startup::AppState;
use crate::workers::decode_image;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

const OUTBOUND_BUFFER: usize = 32;

type SocketSink = SplitSink<WebSocket, Message>;

pub async fn chat_socket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_chat(socket, session_id, state))
}

async fn run_chat(socket: WebSocket, session_id: String, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let session = match state.registry.get_or_create(&session_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Rejecting chat connection");
            let _ = send(&mut sink, &OutboundMessage::Error {
                message: e.to_string(),
            })
            .await;
            let _ = sink.close().await;
            return;
        }
    };
    tracing::info!(session_id = %session_id, "WebSocket connected");

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_BUFFER);
    let closed = session.cancellation().child_token();
    session.attach_delivery(DeliveryHandle::new(&tx, closed.clone()));

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                tracing::info!(session_id = %session_id, "Session closed, ending chat channel");
                break;
            }
            Some(outbound) = rx.recv() => {
                if let Err(e) = send(&mut sink, &outbound).await {
                    tracing::debug!(session_id = %session_id, error = %e, "Send failed");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(&session, &text) {
                        if send(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Binary(bytes))) => ingest_frame(&state, &session_id, bytes).await,
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_id = %session_id, "WebSocket disconnected");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    session.detach_delivery(&tx);
    let _ = sink.close().await;
}

fn handle_text(session: &Arc<Session>, text: &str) -> Option<OutboundMessage> {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Chat { content }) => {
            tracing::info!(session_id = %session.id(), content = %content, "Received chat message");
            session.push_chat(ChatMessage::user_text(content));
            Some(OutboundMessage::Ack {
                message: "Question received".to_string(),
            })
        }
        Ok(InboundMessage::Ping) => Some(OutboundMessage::Pong),
        Err(e) => {
            tracing::warn!(session_id = %session.id(), error = %e, "Unknown message type");
            None
        }
    }
}

async fn ingest_frame(state: &AppState, session_id: &str, bytes: Vec<u8>) {
    let Some(sink) = state.loopback.frame_sink(session_id) else {
        tracing::debug!(session_id = %session_id, "No video track negotiated, frame ignored");
        return;
    };

    let decoded = tokio::task::spawn_blocking(move || decode_image(&bytes)).await;
    let image = match decoded {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            tracing::warn!(session_id = %session_id, error = %e, "Undecodable frame");
            return;
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Frame decoder task failed");
            return;
        }
    };

    match sink.try_push(VideoFrame::new(image)) {
        Ok(true) => {}
        Ok(false) => tracing::debug!(session_id = %session_id, "Track buffer full, frame dropped"),
        Err(e) => tracing::debug!(session_id = %session_id, error = %e, "Track closed"),
    }
}

async fn send(sink: &mut SocketSink, message: &OutboundMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    sink.send(Message::Text(json)).await
}
