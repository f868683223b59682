//! `GET /api/ws/logs?run_id=...` — live log stream (§4.5, §6).
//!
//! Subscribes to the Log Hub for the requested run and forwards events to
//! the socket as JSON frames, following the `tokio::select!` shape of the
//! teacher's `gateway::ws::handle_socket` (`src-tauri/src/gateway/ws.rs`):
//! forward bus events on one arm, read client frames on the other, so a
//! client `Close` or a dead hub channel both end the loop cleanly.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::log_hub::is_origin_allowed;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct WsLogsQuery {
    pub run_id: Option<String>,
}

pub async fn ws_logs_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsLogsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(run_id) = query.run_id else {
        return (StatusCode::BAD_REQUEST, "missing run_id query parameter").into_response();
    };

    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if !is_origin_allowed(origin, &state.config.allowed_origins) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, run_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, run_id: String) {
    let mut sub = state.hub.register(run_id).await;

    loop {
        tokio::select! {
            event = sub.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(s) => s,
                            Err(e) => {
                                log::warn!("gateway: failed to serialize log event: {e}");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
