//! `GET /stream` -- the subscriber WebSocket (spec.md §4.8, §6). Adapted
//! from the teacher's heartbeat-bearing event WebSocket loop: forward bus
//! messages, ping every 30s, detect client close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use dp_core::types::StreamMessage;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    project: Option<String>,
}

pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<StreamQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, state, q.project))
}

async fn handle(socket: WebSocket, state: Arc<AppState>, project: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let subscription = state.hub.subscribe(project);

    match state.snapshot().await {
        Ok(snapshot) => {
            let msg = StreamMessage::Initial { data: snapshot };
            let json = serde_json::to_string(&msg).unwrap_or_default();
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        Err(e) => tracing::warn!(error = %e, "stream: failed to build initial snapshot"),
    }

    let grace = Duration::from_secs(state.config.broadcast.disconnect_grace_secs);
    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    let mut last_success = Instant::now();

    loop {
        tokio::select! {
            msg = subscription.recv() => {
                let json = serde_json::to_string(&msg).unwrap_or_default();
                match ws_tx.send(Message::Text(json.into())).await {
                    Ok(_) => last_success = Instant::now(),
                    Err(_) if last_success.elapsed() < grace => {}
                    Err(_) => break,
                }
            }

            _ = heartbeat.tick() => {
                let ping = serde_json::json!({"type": "ping", "timestamp": chrono::Utc::now().timestamp_millis()});
                if ws_tx.send(Message::Text(ping.to_string().into())).await.is_err() && last_success.elapsed() >= grace {
                    break;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
