//! Shared application state for the relay hub.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::events::EventBus;
use crate::registry::ConnectionRegistry;
use crate::ws::intercept::FrameStats;

/// State handed to every handler and connection task.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub events: EventBus,
    /// Frame counters for the camera interception step. Hub-owned so the
    /// totals survive robot reconnects.
    pub frame_stats: Arc<Mutex<FrameStats>>,
    /// Target used when a chat command names no robot and none is
    /// connected, so failure wording stays stable.
    pub default_robot_id: String,
    /// Externally reachable base URL, used to build media links.
    pub public_base_url: String,
    /// Process-wide shutdown signal. Cancelling it unblocks every
    /// connection loop and closes the transports with a normal close.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        events: EventBus,
        default_robot_id: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            events,
            frame_stats: Arc::new(Mutex::new(FrameStats::new())),
            default_robot_id: default_robot_id.into(),
            public_base_url: public_base_url.into(),
            shutdown: CancellationToken::new(),
        }
    }
}
