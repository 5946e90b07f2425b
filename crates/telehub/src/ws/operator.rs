//! Operator-role WebSocket ingress.

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

use crate::api::{ApiError, AppState};
use crate::events::HubEvent;

use super::OUTBOUND_BUFFER;

#[derive(Debug, Deserialize)]
pub struct OperatorQuery {
    #[serde(rename = "robotId")]
    robot_id: Option<String>,
}

/// GET /unity?robotId=<id> — operator-role upgrade. Unlike the robot side
/// the identity is mandatory: an operator must say which robot it wants,
/// so a missing id is rejected before the upgrade.
pub async fn operator_ws_handler(
    State(state): State<AppState>,
    Query(query): Query<OperatorQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let robot_id = query
        .robot_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("robotId parameter required"))?;

    Ok(ws.on_upgrade(move |socket| handle_operator_connection(socket, robot_id, state)))
}

async fn handle_operator_connection(socket: WebSocket, robot_id: String, state: AppState) {
    info!("Operator connected for robot: {robot_id}");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut outbound) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    state.registry.register_operator(&robot_id, handle.clone());

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

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
                state.events.emit(HubEvent::OperatorMessage { bytes: text.len() });
                if !state
                    .registry
                    .send_to_robot(&robot_id, Message::Text(text))
                    .await
                {
                    debug!("No robot {robot_id} for operator message; dropped");
                }
            }
            Ok(msg @ Message::Binary(_)) => {
                if !state.registry.send_to_robot(&robot_id, msg).await {
                    debug!("No robot {robot_id} for operator message; dropped");
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("Operator for {robot_id} closed the connection");
                break;
            }
            Err(e) => {
                warn!("Operator connection error for {robot_id}: {e}");
                break;
            }
        }
    }

    state.registry.unregister_operator(&robot_id, &handle);
    drop(handle);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), send_task).await;
    info!("Operator disconnected from robot: {robot_id}");
}
