//! End-to-end relay tests over real sockets: a robot-role client and an
//! operator-role client talking through a served hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, header},
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tower::ServiceExt;

use telehub::api::{AppState, create_router};
use telehub::events::EventBus;
use telehub::registry::ConnectionRegistry;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_relay() -> (SocketAddr, AppState) {
    let state = AppState::new(
        Arc::new(ConnectionRegistry::new()),
        EventBus::new(),
        "Robot_Niryo_01",
        "http://localhost:5000",
    );
    let app = create_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, path_and_query: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}{path_and_query}"))
        .await
        .unwrap();
    client
}

/// Wait until both roles are registered for an identity.
async fn wait_for_pair(state: &AppState, robot_id: &str) {
    timeout(WAIT, async {
        loop {
            if state
                .registry
                .status()
                .active_pairs
                .iter()
                .any(|id| id == robot_id)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pair never registered");
}

async fn recv_text(client: &mut Client) -> String {
    timeout(WAIT, async {
        loop {
            match client.next().await.expect("stream ended").unwrap() {
                Message::Text(text) => return text.to_string(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    })
    .await
    .expect("no message arrived")
}

#[tokio::test]
async fn unknown_topics_round_trip_byte_identical() {
    let (addr, state) = spawn_relay().await;
    let mut robot = connect(addr, "/robot?robotId=RT1").await;
    let mut operator = connect(addr, "/unity?robotId=RT1").await;
    wait_for_pair(&state, "RT1").await;

    let downstream = r#"{"op":"publish","topic":"/tf","msg":{"transforms":[1,2,3]}}"#;
    robot.send(Message::Text(downstream.into())).await.unwrap();
    assert_eq!(recv_text(&mut operator).await, downstream);

    let upstream = r#"{"op":"subscribe","topic":"/anything","type":"std_msgs/Empty"}"#;
    operator.send(Message::Text(upstream.into())).await.unwrap();
    assert_eq!(recv_text(&mut robot).await, upstream);
}

#[tokio::test]
async fn heartbeat_is_answered_locally_and_never_forwarded() {
    let (addr, state) = spawn_relay().await;
    let mut robot = connect(addr, "/robot?robotId=RT2").await;
    let mut operator = connect(addr, "/unity?robotId=RT2").await;
    wait_for_pair(&state, "RT2").await;

    robot
        .send(Message::Text(r#"{"op":"ping"}"#.into()))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut robot).await, r#"{"op":"pong"}"#);

    // The operator must not see the heartbeat.
    let leaked = timeout(Duration::from_millis(300), operator.next()).await;
    assert!(leaked.is_err(), "heartbeat leaked to the operator: {leaked:?}");
}

#[tokio::test]
async fn operator_without_identity_is_rejected() {
    let (addr, _state) = spawn_relay().await;
    let err = connect_async(format!("ws://{addr}/unity"))
        .await
        .expect_err("connection should be rejected");
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 400),
        other => panic!("expected an HTTP 400 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn robot_identity_is_generated_when_absent() {
    let (addr, state) = spawn_relay().await;
    let _robot = connect(addr, "/robot").await;

    timeout(WAIT, async {
        loop {
            let status = state.registry.status();
            if status.robot_ids.iter().any(|id| id.starts_with("Robot_")) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("generated identity never registered");
}

#[tokio::test]
async fn joint_telemetry_feeds_the_nudge_command() {
    let (addr, state) = spawn_relay().await;
    let mut robot = connect(addr, "/robot?robotId=Robot_01").await;

    robot
        .send(Message::Text(
            r#"{"op":"publish","topic":"/joint_states","msg":{"position":[0.1,0.2,0.3,0,0,0]}}"#
                .into(),
        ))
        .await
        .unwrap();

    timeout(WAIT, async {
        loop {
            if state.registry.current_joints() == [0.1, 0.2, 0.3, 0.0, 0.0, 0.0] {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("joint cache was never updated");

    // Command with no explicit target resolves to the only connected robot.
    let response = create_router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/whatsapp")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("Body=left"))
                .unwrap(),
        )
        .await
        .unwrap();
    let xml = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let xml = String::from_utf8(xml.to_vec()).unwrap();
    assert!(xml.contains("Turning Left"), "got: {xml}");

    let payload = recv_text(&mut robot).await;
    let v: Value = serde_json::from_str(&payload).unwrap();
    let positions: Vec<f64> = v["msg"]["points"][0]["positions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_f64().unwrap())
        .collect();
    assert!((positions[0] - 0.3).abs() < 1e-9);
    assert_eq!(&positions[1..], &[0.2, 0.3, 0.0, 0.0, 0.0]);
}

#[tokio::test]
async fn malformed_topic_message_forwards_raw_and_keeps_the_loop_alive() {
    let (addr, state) = spawn_relay().await;
    let mut robot = connect(addr, "/robot?robotId=RT3").await;
    let mut operator = connect(addr, "/unity?robotId=RT3").await;
    wait_for_pair(&state, "RT3").await;

    // Topic marker present, JSON broken: interception must be skipped and
    // the raw bytes still forwarded.
    let broken = r#"{"topic":"/joint_states","msg":{"position":[0.5"#;
    robot.send(Message::Text(broken.into())).await.unwrap();
    assert_eq!(recv_text(&mut operator).await, broken);
    assert_eq!(state.registry.current_joints(), [0.0; 6]);

    // The connection survived: a valid update still lands in the cache.
    let valid = r#"{"op":"publish","topic":"/joint_states","msg":{"position":[1,1,1,1,1,1]}}"#;
    robot.send(Message::Text(valid.into())).await.unwrap();
    assert_eq!(recv_text(&mut operator).await, valid);
    assert_eq!(state.registry.current_joints(), [1.0; 6]);
}
