//! WebSocket viewer gateway.
//!
//! Each connection subscribes to the orchestrator, gets an `initial_state`
//! frame and then every event in publish order. Inbound chat frames are
//! forwarded to the orchestrator; nothing here touches the session itself.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use debatearena_core::DebateEvent;
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::AppState;

/// Frames a viewer may send.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat { message: String },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let orchestrator = &state.orchestrator;
    let gateway = &orchestrator.config().gateway;
    let ping_every = Duration::from_secs(gateway.ping_interval_secs);
    let idle_timeout = Duration::from_secs(gateway.idle_timeout_secs);

    let (snapshot, mut subscription) = orchestrator.subscribe().await;
    let id = subscription.id();
    info!(viewer = id, "Viewer connected");

    if send_event(&mut socket, &DebateEvent::InitialState { debate: snapshot })
        .await
        .is_err()
    {
        orchestrator.unsubscribe(id);
        return;
    }

    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                None => {
                    debug!(viewer = id, "Publisher dropped viewer");
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(message)) => {
                    last_seen = Instant::now();
                    match message {
                        Message::Text(text) => handle_frame(&state, id, text.as_str()).await,
                        Message::Ping(payload) => {
                            if socket.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(Err(e)) => {
                    debug!(viewer = id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    info!(viewer = id, "Reaping idle viewer");
                    break;
                }
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    orchestrator.unsubscribe(id);
    info!(viewer = id, "Viewer disconnected");
}

async fn handle_frame(state: &AppState, viewer: u64, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Chat { message }) => {
            if let Err(e) = state.orchestrator.handle_chat(&message).await {
                debug!(viewer, error = %e, "Chat message rejected");
            }
        }
        Err(e) => debug!(viewer, error = %e, "Ignoring unrecognised frame"),
    }
}

async fn send_event(socket: &mut WebSocket, event: &DebateEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(event = event.kind(), error = %e, "Failed to serialise event");
            return Ok(());
        }
    };
    socket.send(Message::Text(payload.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_frame() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"chat","message":"Go Rex!"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Chat {
                message: "Go Rex!".to_string()
            }
        );
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"vote"}"#).is_err());
    }
}
