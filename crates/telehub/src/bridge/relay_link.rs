//! Relay-facing bridge loop.
//!
//! Gating policy: a connection attempt waits until the robot link is
//! Streaming. The alternative — connecting unconditionally and letting the
//! robot loop's abort force a reconnect — satisfies the same invariant,
//! but gating keeps heartbeat traffic from ever flowing while the robot is
//! down, so the hub's view of "bridge connected" always implies "robot
//! connected".

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use telehub_protocol::{PING_TEXT, is_pong, register_robot};

use super::{BridgeService, LinkState, OUTBOUND_BUFFER, WsStream};

pub(super) async fn run(bridge: Arc<BridgeService>) {
    let url = format!(
        "{}?robotId={}",
        bridge.settings.relay_url, bridge.settings.robot_id
    );
    let mut robot_state = bridge.robot.subscribe_state();

    'outer: while !bridge.cancel.is_cancelled() {
        // Gate on the robot link: no relay session without a live robot.
        while *robot_state.borrow_and_update() != LinkState::Streaming {
            tokio::select! {
                _ = bridge.cancel.cancelled() => break 'outer,
                changed = robot_state.changed() => {
                    if changed.is_err() {
                        break 'outer;
                    }
                }
            }
        }

        bridge.relay.set_state(LinkState::Connecting);
        info!("[bridge] Connecting to relay {url}...");

        let connected = tokio::select! {
            _ = bridge.cancel.cancelled() => break,
            result = connect_async(&url) => result,
        };

        match connected {
            Ok((socket, _)) => {
                info!("[bridge] Connected to relay server");
                stream_relay(&bridge, socket).await;
            }
            Err(e) => warn!("[bridge] Failed to connect to relay server: {e}"),
        }

        bridge.relay.set_state(LinkState::Disconnected);

        tokio::select! {
            _ = bridge.cancel.cancelled() => break,
            _ = tokio::time::sleep(bridge.settings.retry_delay) => {}
        }
    }

    bridge.relay.set_state(LinkState::Disconnected);
}

async fn stream_relay(bridge: &Arc<BridgeService>, socket: WsStream) {
    let (mut sink, mut stream) = socket.split();

    // Identify ourselves before any other traffic.
    let register = register_robot(&bridge.settings.robot_id);
    if sink.send(WsMessage::Text(register.into())).await.is_err() {
        warn!("[bridge] Could not send registration; dropping connection");
        return;
    }

    let (tx, mut outbound) = mpsc::channel::<WsMessage>(OUTBOUND_BUFFER);
    bridge.relay.attach(tx);
    bridge.relay.set_state(LinkState::Streaming);

    let mut heartbeat = tokio::time::interval(bridge.settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // At most one heartbeat in flight; a pong that never comes just leaves
    // the latency sample stale.
    let mut pending_ping: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = bridge.cancel.cancelled() => {
                bridge.relay.set_state(LinkState::Closing);
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            _ = bridge.relay.aborted() => {
                info!("[bridge] Robot link lost; dropping relay connection");
                break;
            }
            _ = heartbeat.tick() => {
                if pending_ping.is_none() {
                    if sink.send(WsMessage::Text(PING_TEXT.into())).await.is_err() {
                        warn!("[bridge] Heartbeat send failed; dropping connection");
                        break;
                    }
                    pending_ping = Some(Instant::now());
                }
            }
            Some(msg) = outbound.recv() => {
                if sink.send(msg).await.is_err() {
                    warn!("[bridge] Send failed; dropping connection");
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if is_pong(text.as_str()) {
                        if let Some(sent_at) = pending_ping.take() {
                            let ms = sent_at.elapsed().as_millis() as u64;
                            bridge.record_latency(ms);
                            debug!("[bridge] Heartbeat RTT {ms} ms");
                        }
                        // Heartbeat payloads are never forwarded.
                    } else if !bridge.robot.send(WsMessage::Text(text)).await {
                        warn!("[bridge] Cannot forward command: not connected to robot");
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    if !bridge.robot.send(WsMessage::Binary(data)).await {
                        warn!("[bridge] Cannot forward command: not connected to robot");
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("[bridge] Relay closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[bridge] Receive error: {e}");
                    break;
                }
            }
        }
    }

    bridge.relay.detach();
}
