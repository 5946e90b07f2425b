//! Robot-role WebSocket ingress.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::AppState;

use super::{OUTBOUND_BUFFER, intercept};

#[derive(Debug, Deserialize)]
pub struct RobotQuery {
    #[serde(rename = "robotId")]
    robot_id: Option<String>,
}

/// GET /robot?robotId=<id> — robot-role upgrade. The id is optional here;
/// an unnamed bridge gets a generated identity.
pub async fn robot_ws_handler(
    State(state): State<AppState>,
    Query(query): Query<RobotQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let robot_id = query
        .robot_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("Robot_{}", Uuid::new_v4().simple()));

    ws.on_upgrade(move |socket| handle_robot_connection(socket, robot_id, state))
}

async fn handle_robot_connection(socket: WebSocket, robot_id: String, state: AppState) {
    info!("Bridge client connected: {robot_id}");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut outbound) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    state.registry.register_robot(&robot_id, handle.clone());

    // Writer task: drains the registry handle into the socket. Dropping the
    // receiver is what marks this connection closed for `is_connected`.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // The WebSocket layer reassembles fragmented frames, so every item here
    // is one full protocol message.
    loop {
        let received = tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = handle.send(Message::Close(None)).await;
                break;
            }
            received = ws_rx.next() => received,
        };
        let Some(received) = received else { break };

        match received {
            Ok(Message::Text(text)) => {
                if intercept::process_robot_message(&state, &robot_id, text.as_str()).await {
                    // Heartbeat traffic is link-local, never forwarded.
                    continue;
                }
                if !state
                    .registry
                    .send_to_operator(&robot_id, Message::Text(text))
                    .await
                {
                    debug!("No operator for {robot_id}; message dropped");
                }
            }
            Ok(msg @ Message::Binary(_)) => {
                // No interception for binary frames; pass through verbatim.
                if !state.registry.send_to_operator(&robot_id, msg).await {
                    debug!("No operator for {robot_id}; binary message dropped");
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Transport-level keepalive, answered by the WS layer.
            }
            Ok(Message::Close(_)) => {
                info!("Robot {robot_id} closed the connection");
                break;
            }
            Err(e) => {
                warn!("Robot {robot_id} connection error: {e}");
                break;
            }
        }
    }

    state.registry.unregister_robot(&robot_id, &handle);
    // Dropping the last sender lets the writer flush (including a close
    // frame on shutdown) and exit on its own; a stalled socket is bounded.
    drop(handle);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), send_task).await;
    info!("Robot disconnected: {robot_id}");
}
