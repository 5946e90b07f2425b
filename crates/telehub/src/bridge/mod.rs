//! Robot-side bridge client.
//!
//! Two outbound WebSocket links — one to the robot's RTP endpoint, one to
//! the relay hub — each owned by a perpetually retrying loop with a fixed
//! delay. The robot link owns the subscription set and re-issues it on
//! every reconnect; the relay link owns the heartbeat. The relay loop is
//! gated on the robot link being live, and the robot loop aborts the relay
//! link on failure, so the hub never keeps representing this bridge while
//! the robot is unreachable.

mod relay_link;
mod robot_link;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::events::EventBus;

/// Size of each link's outbound buffer.
const OUTBOUND_BUFFER: usize = 64;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection state of one bridge link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    Closing,
}

/// Bridge configuration, resolved from the config file by the CLI.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Identity under which the hub addresses this robot.
    pub robot_id: String,
    /// Robot RTP endpoint, e.g. `ws://169.254.200.200:9090`.
    pub robot_url: String,
    /// Relay robot-role ingress, e.g. `ws://relay:5000/robot`.
    pub relay_url: String,
    /// Joint telemetry throttle in milliseconds.
    pub telemetry_interval_ms: u32,
    /// Gripper state throttle in milliseconds.
    pub gripper_interval_ms: u32,
    /// System state throttle in milliseconds.
    pub state_interval_ms: u32,
    pub heartbeat_interval: Duration,
    pub retry_delay: Duration,
}

/// Shared handle for one link: where the *other* loop drops messages for
/// this link's socket, plus the observable state machine.
pub(crate) struct Link {
    outbound: Mutex<Option<mpsc::Sender<WsMessage>>>,
    state: watch::Sender<LinkState>,
    abort: Notify,
}

impl Link {
    fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            outbound: Mutex::new(None),
            state,
            abort: Notify::new(),
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn attach(&self, tx: mpsc::Sender<WsMessage>) {
        *self.outbound.lock().expect("link handle poisoned") = Some(tx);
    }

    fn detach(&self) {
        *self.outbound.lock().expect("link handle poisoned") = None;
    }

    /// Best-effort hand-off to this link's socket. `false` when the link
    /// is down; the caller logs and drops, exactly like the registry path.
    async fn send(&self, msg: WsMessage) -> bool {
        let tx = self.outbound.lock().expect("link handle poisoned").clone();
        match tx {
            Some(tx) => tx.send(msg).await.is_ok(),
            None => false,
        }
    }

    /// Wake this link's receive loop so it tears the connection down now.
    /// Only wakes a live session — an idle link has nothing to abort.
    fn abort(&self) {
        self.abort.notify_waiters();
    }

    async fn aborted(&self) {
        self.abort.notified().await;
    }
}

/// The bridge: both link loops plus the shared heartbeat sample.
pub struct BridgeService {
    settings: BridgeSettings,
    events: EventBus,
    cancel: CancellationToken,
    robot: Link,
    relay: Link,
    latency_ms: AtomicU64,
}

impl BridgeService {
    pub fn new(settings: BridgeSettings, events: EventBus, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            settings,
            events,
            cancel,
            robot: Link::new(),
            relay: Link::new(),
            latency_ms: AtomicU64::new(0),
        })
    }

    /// Run both link loops until the cancellation token fires.
    pub async fn run(self: Arc<Self>) {
        let robot = tokio::spawn(robot_link::run(self.clone()));
        let relay = tokio::spawn(relay_link::run(self.clone()));
        let _ = tokio::join!(robot, relay);
    }

    /// Latest heartbeat round-trip in milliseconds. 0 until the first pong.
    pub fn latency_ms(&self) -> u64 {
        self.latency_ms.load(Ordering::Relaxed)
    }

    pub fn robot_state(&self) -> LinkState {
        self.robot.state()
    }

    pub fn relay_state(&self) -> LinkState {
        self.relay.state()
    }

    fn record_latency(&self, ms: u64) {
        self.latency_ms.store(ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_send_without_attachment_is_dropped() {
        let link = Link::new();
        assert!(!link.send(WsMessage::Text("x".into())).await);

        let (tx, mut rx) = mpsc::channel(4);
        link.attach(tx);
        assert!(link.send(WsMessage::Text("y".into())).await);
        assert!(matches!(rx.try_recv().unwrap(), WsMessage::Text(t) if t.as_str() == "y"));

        link.detach();
        assert!(!link.send(WsMessage::Text("z".into())).await);
    }

    #[tokio::test]
    async fn link_state_transitions_are_observable() {
        let link = Link::new();
        let mut watcher = link.subscribe_state();
        assert_eq!(link.state(), LinkState::Disconnected);

        link.set_state(LinkState::Connecting);
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow(), LinkState::Connecting);

        link.set_state(LinkState::Streaming);
        assert_eq!(link.state(), LinkState::Streaming);
    }

    #[tokio::test]
    async fn abort_wakes_a_waiting_session_only() {
        let link = Arc::new(Link::new());

        // No waiter yet: the notification must not be banked for later.
        link.abort();

        let waiter = {
            let link = link.clone();
            tokio::spawn(async move {
                link.aborted().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        link.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("abort did not wake the session")
            .unwrap();
    }
}
