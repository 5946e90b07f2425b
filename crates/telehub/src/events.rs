//! Hub event bus.
//!
//! The presentation layer (dashboard, log console) is a separate concern;
//! the core only publishes observable notifications on a broadcast channel.
//! Emitting with no subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

/// Size of the broadcast channel for hub events.
const EVENT_BUFFER_SIZE: usize = 256;

/// Notifications published by the hub and the bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// The bridge's robot-facing link went up or down.
    ConnectivityChanged { connected: bool },

    /// A joint vector was intercepted and cached.
    JointsReceived { joints: [f64; 6] },

    /// A camera frame was intercepted and cached.
    FrameReceived { bytes: usize },

    /// Per-second frame statistics.
    FrameStats { fps: u32, total: u64 },

    /// An operator-role message passed through the hub.
    OperatorMessage { bytes: usize },

    /// A chat command or reply crossed the command endpoint.
    ChatLog { line: String },

    /// Free-form diagnostic line for the console view.
    Log { line: String },
}

/// Broadcast bus carrying [`HubEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn emit(&self, event: HubEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
