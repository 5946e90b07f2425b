//! Connection registry: the in-memory directory of live endpoints plus the
//! two telemetry caches.
//!
//! One robot-role and one operator-role handle may exist per identity; a
//! re-registration replaces the previous handle, which is then considered
//! stale. Sends are best-effort — a missing or closed handle drops the
//! message and the caller decides whether that is worth logging.
//!
//! Map guards are never held across an `.await`; senders are cloned out
//! first so a stalled peer cannot block access for other identities.

use std::sync::{Arc, RwLock};

use axum::extract::ws::Message;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

/// Joint count of the arm. Telemetry beyond this index is ignored.
pub const JOINT_COUNT: usize = 6;

/// Per-connection outbound handle. The receiving end lives in that
/// connection's writer task, so a closed channel means a dead transport.
pub type WsSender = mpsc::Sender<Message>;

/// Optional low-latency send path (a WebRTC-style data channel) that the
/// registry prefers over the WebSocket when one is registered for an
/// identity. Implementations live outside this core.
pub trait PeerTransport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Hand a text payload to the peer channel. `false` means the caller
    /// should fall back to the WebSocket path.
    fn send_text(&self, text: &str) -> bool;
}

/// Diagnostic snapshot returned by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub robot_ids: Vec<String>,
    /// Identities with both a robot-role and an operator-role handle.
    pub active_pairs: Vec<String>,
}

/// Directory of active endpoints and latest-telemetry caches.
pub struct ConnectionRegistry {
    robots: DashMap<String, WsSender>,
    operators: DashMap<String, WsSender>,
    peers: DashMap<String, Arc<dyn PeerTransport>>,
    latest_image: RwLock<Option<Bytes>>,
    current_joints: RwLock<[f64; JOINT_COUNT]>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            robots: DashMap::new(),
            operators: DashMap::new(),
            peers: DashMap::new(),
            latest_image: RwLock::new(None),
            current_joints: RwLock::new([0.0; JOINT_COUNT]),
        }
    }

    // ---- endpoint handles ----

    /// Register (or replace) the robot-role handle for an identity.
    pub fn register_robot(&self, robot_id: &str, handle: WsSender) {
        self.robots.insert(robot_id.to_string(), handle);
    }

    /// Register (or replace) the operator-role handle for an identity.
    pub fn register_operator(&self, robot_id: &str, handle: WsSender) {
        self.operators.insert(robot_id.to_string(), handle);
    }

    /// Remove the robot-role handle, but only if it is still `handle`.
    /// A connection that was already replaced must not evict its successor.
    pub fn unregister_robot(&self, robot_id: &str, handle: &WsSender) {
        self.robots
            .remove_if(robot_id, |_, current| current.same_channel(handle));
    }

    /// Remove the operator-role handle, guarded like [`Self::unregister_robot`].
    pub fn unregister_operator(&self, robot_id: &str, handle: &WsSender) {
        self.operators
            .remove_if(robot_id, |_, current| current.same_channel(handle));
    }

    /// Register a preferred peer transport for an identity.
    pub fn register_peer(&self, robot_id: &str, peer: Arc<dyn PeerTransport>) {
        self.peers.insert(robot_id.to_string(), peer);
    }

    pub fn unregister_peer(&self, robot_id: &str) {
        self.peers.remove(robot_id);
    }

    /// Whether a robot-role handle exists and its transport is still open.
    pub fn is_connected(&self, robot_id: &str) -> bool {
        self.robots
            .get(robot_id)
            .map(|entry| !entry.value().is_closed())
            .unwrap_or(false)
    }

    /// An arbitrary registered robot id, used when an inbound command names
    /// no target. Ordering is not guaranteed.
    pub fn first_connected_robot_id(&self) -> Option<String> {
        self.robots
            .iter()
            .find(|entry| !entry.value().is_closed())
            .map(|entry| entry.key().clone())
    }

    // ---- telemetry caches ----

    /// Replace the cached camera frame.
    pub fn update_image(&self, image: Vec<u8>) {
        let mut cache = self.latest_image.write().expect("image cache poisoned");
        *cache = Some(Bytes::from(image));
    }

    /// The latest cached frame, if any frame was ever received. The cache
    /// survives disconnects; only process exit clears it.
    pub fn latest_image(&self) -> Option<Bytes> {
        self.latest_image
            .read()
            .expect("image cache poisoned")
            .clone()
    }

    /// Replace the cached joint vector. Shorter input updates only the
    /// leading joints; values beyond the sixth are ignored.
    pub fn update_joints(&self, joints: &[f64]) {
        let mut cache = self.current_joints.write().expect("joint cache poisoned");
        let n = joints.len().min(JOINT_COUNT);
        cache[..n].copy_from_slice(&joints[..n]);
    }

    /// A snapshot of the joint cache. The caller owns the copy; later
    /// updates do not touch it.
    pub fn current_joints(&self) -> [f64; JOINT_COUNT] {
        *self.current_joints.read().expect("joint cache poisoned")
    }

    // ---- send primitives ----

    /// Best-effort send to the robot-role handle. Returns whether the
    /// message was handed to an open transport.
    pub async fn send_to_robot(&self, robot_id: &str, msg: Message) -> bool {
        let Some(tx) = self.robots.get(robot_id).map(|e| e.value().clone()) else {
            return false;
        };
        tx.send(msg).await.is_ok()
    }

    /// Best-effort send to the operator side, preferring a registered peer
    /// transport for text payloads and falling back to the WebSocket.
    pub async fn send_to_operator(&self, robot_id: &str, msg: Message) -> bool {
        if let Message::Text(ref text) = msg {
            let peer = self.peers.get(robot_id).map(|e| e.value().clone());
            if let Some(peer) = peer
                && peer.is_open()
                && peer.send_text(text.as_str())
            {
                return true;
            }
        }
        let Some(tx) = self.operators.get(robot_id).map(|e| e.value().clone()) else {
            return false;
        };
        tx.send(msg).await.is_ok()
    }

    // ---- diagnostics ----

    pub fn status(&self) -> StatusSnapshot {
        let robot_ids: Vec<String> = self.robots.iter().map(|e| e.key().clone()).collect();
        let active_pairs = robot_ids
            .iter()
            .filter(|id| self.operators.contains_key(id.as_str()))
            .cloned()
            .collect();
        StatusSnapshot {
            timestamp: Utc::now(),
            robot_ids,
            active_pairs,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
