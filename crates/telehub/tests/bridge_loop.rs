//! Bridge client tests against in-process mock endpoints: a fake robot
//! RTP server and a fake relay, both plain tokio-tungstenite acceptors.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use telehub::bridge::{BridgeService, BridgeSettings, LinkState};
use telehub::events::EventBus;

const WAIT: Duration = Duration::from_secs(5);

fn settings(robot_addr: SocketAddr, relay_addr: SocketAddr) -> BridgeSettings {
    BridgeSettings {
        robot_id: "RT_bridge".to_string(),
        robot_url: format!("ws://{robot_addr}"),
        relay_url: format!("ws://{relay_addr}/robot"),
        telemetry_interval_ms: 100,
        gripper_interval_ms: 200,
        state_interval_ms: 500,
        heartbeat_interval: Duration::from_millis(50),
        retry_delay: Duration::from_millis(100),
    }
}

/// Accept one WebSocket connection on the listener.
async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("nobody connected")
        .unwrap();
    accept_async(stream).await.unwrap()
}

#[tokio::test]
async fn bridge_subscribes_registers_heartbeats_and_forwards() {
    let robot_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let settings = settings(
        robot_listener.local_addr().unwrap(),
        relay_listener.local_addr().unwrap(),
    );

    let cancel = CancellationToken::new();
    let bridge = BridgeService::new(settings, EventBus::new(), cancel.clone());
    let bridge_task = tokio::spawn(bridge.clone().run());

    // Mock robot: collect the subscription set, then publish a frame every
    // poll tick (the relay link may not be up yet for the first ones) and
    // surface every later inbound message to the test.
    let (robot_seen_tx, mut robot_seen) = mpsc::channel::<String>(32);
    let robot_task = tokio::spawn(async move {
        let mut ws = accept_ws(&robot_listener).await;
        for _ in 0..4 {
            let msg = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
            robot_seen_tx.send(msg.to_text().unwrap().to_string()).await.unwrap();
        }
        let mut publish = tokio::time::interval(Duration::from_millis(50));
        loop {
            tokio::select! {
                _ = publish.tick() => {
                    if ws
                        .send(Message::Text(r#"{"op":"publish","topic":"/tf","msg":{}}"#.into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        robot_seen_tx.send(text.to_string()).await.unwrap();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    });

    // Mock relay: expect registration first, answer pings late enough to
    // make the RTT measurable, surface everything else to the test.
    let (relay_seen_tx, mut relay_seen) = mpsc::channel::<String>(32);
    let relay_task = tokio::spawn(async move {
        let mut ws = accept_ws(&relay_listener).await;
        // Push one operator command down to the robot once registered.
        let mut sent_command = false;
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            if text.as_str().contains(r#""op":"ping""#) {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ws.send(Message::Text(r#"{"op":"pong"}"#.into())).await.unwrap();
                continue;
            }
            relay_seen_tx.send(text.to_string()).await.unwrap();
            if !sent_command {
                sent_command = true;
                ws.send(Message::Text(
                    r#"{"op":"call_service","service":"/niryo_robot/tools/open_gripper"}"#.into(),
                ))
                .await
                .unwrap();
            }
        }
    });

    // Subscription set arrives on every connect, in one batch of four.
    let mut topics = Vec::new();
    for _ in 0..4 {
        let raw = timeout(WAIT, robot_seen.recv()).await.unwrap().unwrap();
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["op"], "subscribe");
        topics.push(v["topic"].as_str().unwrap().to_string());
    }
    assert!(topics.contains(&"/joint_states".to_string()));
    assert!(
        topics.contains(&"/niryo_robot_vision/compressed_video_stream".to_string())
    );

    // Registration is the first non-heartbeat message the relay sees.
    let first = timeout(WAIT, relay_seen.recv()).await.unwrap().unwrap();
    let v: Value = serde_json::from_str(&first).unwrap();
    assert_eq!(v["type"], "registerRobot");
    assert_eq!(v["robotId"], "RT_bridge");

    // The robot's frame is forwarded to the relay unmodified.
    let forwarded = timeout(WAIT, relay_seen.recv()).await.unwrap().unwrap();
    assert_eq!(forwarded, r#"{"op":"publish","topic":"/tf","msg":{}}"#);

    // The relay's command reaches the robot unmodified.
    let command = timeout(WAIT, robot_seen.recv()).await.unwrap().unwrap();
    assert!(command.contains("open_gripper"), "got: {command}");

    // The delayed pong produced a latency sample; the ping itself was
    // consumed by the mock relay, not forwarded anywhere.
    timeout(WAIT, async {
        while bridge.latency_ms() < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no heartbeat sample was recorded");

    assert_eq!(bridge.robot_state(), LinkState::Streaming);
    assert_eq!(bridge.relay_state(), LinkState::Streaming);

    cancel.cancel();
    timeout(WAIT, bridge_task)
        .await
        .expect("bridge did not stop on cancellation")
        .unwrap();
    robot_task.abort();
    relay_task.abort();
}

#[tokio::test]
async fn robot_loss_aborts_the_relay_link_and_reconnects() {
    let robot_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let settings = settings(
        robot_listener.local_addr().unwrap(),
        relay_listener.local_addr().unwrap(),
    );

    let cancel = CancellationToken::new();
    let bridge = BridgeService::new(settings, EventBus::new(), cancel.clone());
    let bridge_task = tokio::spawn(bridge.clone().run());

    // First robot session: swallow the subscriptions, then die abruptly.
    let mut ws = accept_ws(&robot_listener).await;
    for _ in 0..4 {
        timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    }

    // Relay session comes up once the robot link streams.
    let mut relay_ws = accept_ws(&relay_listener).await;
    let registered = timeout(WAIT, relay_ws.next()).await.unwrap().unwrap().unwrap();
    assert!(registered.to_text().unwrap().contains("registerRobot"));

    drop(ws);

    // The robot loop must tear the relay session down with it.
    timeout(WAIT, async {
        loop {
            match relay_ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("relay link survived the robot loss");

    // And the robot loop retries: a second session appears, with the
    // subscriptions re-issued from scratch.
    let mut ws = accept_ws(&robot_listener).await;
    let first = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let v: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
    assert_eq!(v["op"], "subscribe");

    cancel.cancel();
    timeout(WAIT, bridge_task)
        .await
        .expect("bridge did not stop on cancellation")
        .unwrap();
}

#[tokio::test]
async fn relay_connection_waits_for_the_robot_link() {
    // No robot endpoint at all: grab a port and close the listener so
    // connects fail immediately.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let settings = settings(dead_addr, relay_listener.local_addr().unwrap());

    let cancel = CancellationToken::new();
    let bridge = BridgeService::new(settings, EventBus::new(), cancel.clone());
    let bridge_task = tokio::spawn(bridge.clone().run());

    // The relay ingress must stay silent while the robot is unreachable.
    let gated = timeout(Duration::from_millis(500), relay_listener.accept()).await;
    assert!(gated.is_err(), "relay link connected without a robot link");
    assert_eq!(bridge.relay_state(), LinkState::Disconnected);

    cancel.cancel();
    timeout(WAIT, bridge_task)
        .await
        .expect("bridge did not stop on cancellation")
        .unwrap();
}
