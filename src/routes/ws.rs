//! WebSocket endpoint for room subscriptions.
//!
//! Clients send `{"type":"join","room":"..."}` or `{"type":"leave"}`; the
//! server pushes `{"event","room","payload"}` for the joined room.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use crate::models::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Join { room: String },
    Leave,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (connection_id, mut events) = state.hub.connect().await;
    info!(connection = %connection_id, "WebSocket connected");

    // Writer task: forwards room events to the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join { room }) => {
                    let room = room.trim();
                    if !room.is_empty() {
                        state.hub.join(connection_id, room).await;
                    }
                }
                Ok(ClientMessage::Leave) => state.hub.leave(connection_id).await,
                Err(_) => debug!(connection = %connection_id, "Ignoring unparseable message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.hub.disconnect(connection_id).await;
    info!(connection = %connection_id, "WebSocket disconnected");
}
