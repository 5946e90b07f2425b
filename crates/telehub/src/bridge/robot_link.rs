//! Robot-facing bridge loop.
//!
//! Connects to the robot's RTP endpoint, issues the subscription set, and
//! forwards everything the robot publishes to the relay link. On any
//! failure it aborts the relay link — the hub must observe the robot as
//! gone immediately, not after its own timeout — then retries from
//! scratch after a fixed delay. Subscriptions are never persisted across
//! reconnects.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use telehub_protocol::{JOINT_STATES_TOPIC, RtpEnvelope, VIDEO_STREAM_TOPIC};

use crate::events::HubEvent;

use super::{BridgeService, LinkState, OUTBOUND_BUFFER, WsStream};

const GRIPPER_STATE_TOPIC: &str = "/niryo_robot/gripper_state";
const ROBOT_STATE_TOPIC: &str = "/niryo_robot/robot_state";

pub(super) async fn run(bridge: Arc<BridgeService>) {
    let url = bridge.settings.robot_url.clone();

    while !bridge.cancel.is_cancelled() {
        bridge.robot.set_state(LinkState::Connecting);
        info!("[ros] Connecting to {url}...");

        let connected = tokio::select! {
            _ = bridge.cancel.cancelled() => break,
            result = connect_async(&url) => result,
        };

        match connected {
            Ok((socket, _)) => {
                info!("[ros] Connected to robot");
                bridge
                    .events
                    .emit(HubEvent::ConnectivityChanged { connected: true });
                stream_robot(&bridge, socket).await;
            }
            Err(e) => warn!("[ros] Failed to connect to robot ({url}): {e}"),
        }

        bridge.robot.set_state(LinkState::Disconnected);
        bridge
            .events
            .emit(HubEvent::ConnectivityChanged { connected: false });
        // Force the relay link down so the hub sees us offline now.
        bridge.relay.abort();

        tokio::select! {
            _ = bridge.cancel.cancelled() => break,
            _ = tokio::time::sleep(bridge.settings.retry_delay) => {}
        }
    }

    bridge.robot.set_state(LinkState::Disconnected);
}

async fn stream_robot(bridge: &Arc<BridgeService>, socket: WsStream) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut outbound) = mpsc::channel::<WsMessage>(OUTBOUND_BUFFER);
    bridge.robot.attach(tx);

    bridge.robot.set_state(LinkState::Subscribing);
    if !issue_subscriptions(bridge).await {
        bridge.robot.detach();
        return;
    }
    bridge.robot.set_state(LinkState::Streaming);

    loop {
        tokio::select! {
            _ = bridge.cancel.cancelled() => {
                bridge.robot.set_state(LinkState::Closing);
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            Some(msg) = outbound.recv() => {
                if sink.send(msg).await.is_err() {
                    warn!("[ros] Send failed; dropping connection");
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if !bridge.relay.send(WsMessage::Text(text)).await {
                        debug!("[ros] Relay link down; telemetry frame dropped");
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    if !bridge.relay.send(WsMessage::Binary(data)).await {
                        debug!("[ros] Relay link down; binary frame dropped");
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("[ros] Robot closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[ros] Receive error: {e}");
                    break;
                }
            }
        }
    }

    bridge.robot.detach();
}

/// Re-issue the full subscription set. Runs on every reconnect; the robot
/// forgets subscriptions when the socket drops.
async fn issue_subscriptions(bridge: &BridgeService) -> bool {
    let s = &bridge.settings;
    let subscriptions = [
        RtpEnvelope::subscribe(
            JOINT_STATES_TOPIC,
            "sensor_msgs/JointState",
            s.telemetry_interval_ms,
        ),
        // Camera at full rate; the hub's FPS counter is the consumer-side view.
        RtpEnvelope::subscribe(VIDEO_STREAM_TOPIC, "sensor_msgs/CompressedImage", 0),
        RtpEnvelope::subscribe(GRIPPER_STATE_TOPIC, "std_msgs/Int32", s.gripper_interval_ms),
        RtpEnvelope::subscribe(
            ROBOT_STATE_TOPIC,
            "niryo_robot_msgs/RobotState",
            s.state_interval_ms,
        ),
    ];

    for subscription in subscriptions {
        if !bridge
            .robot
            .send(WsMessage::Text(subscription.to_text().into()))
            .await
        {
            warn!("[ros] Could not issue subscriptions; dropping connection");
            return false;
        }
    }
    info!("[ros] Subscribed to joint states, camera stream, gripper and robot state");
    true
}
