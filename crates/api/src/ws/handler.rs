use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Upgrades an overlay renderer connection to the caption event feed.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!(%connection_id, "Overlay connected");

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.pipeline.subscribe();

    let greeting = serde_json::json!({
        "type": "connected",
        "connection_id": connection_id,
    });
    let greeting = serde_json::to_string(&greeting).unwrap_or_default();
    if sender.send(Message::text(greeting)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%connection_id, %e, "Failed to serialize caption event");
                            continue;
                        }
                    };
                    if sender.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Slow overlays skip events rather than stalling the pipeline.
                    warn!(%connection_id, missed, "Overlay lagging behind the caption feed");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    debug!(%connection_id, "Ignoring overlay message");
                }
                Some(Err(e)) => {
                    warn!(%connection_id, %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    info!(%connection_id, "Overlay disconnected");
}
