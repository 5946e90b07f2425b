//! Protocol-level interception for the robot-role ingress.
//!
//! Three message classes get special handling before (or instead of)
//! forwarding: heartbeat requests are answered locally, joint telemetry
//! feeds the nudge cache, camera frames feed the image cache and the FPS
//! counters. Anything the decoders cannot make sense of falls through and
//! is forwarded raw — a parse failure must never cost the operator a
//! message.

use std::time::Instant;

use log::{info, warn};
use telehub_protocol as protocol;

use crate::api::AppState;
use crate::events::HubEvent;

/// Frame counters for the camera stream. Owned by the hub so totals
/// survive robot reconnects.
#[derive(Debug)]
pub struct FrameStats {
    total: u64,
    in_window: u32,
    window_start: Instant,
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            total: 0,
            in_window: 0,
            window_start: Instant::now(),
        }
    }

    /// Count one frame. Returns `(first_ever, stats)` where `stats` is
    /// `Some((fps, total))` once per full second — fps is the count inside
    /// the window that just closed.
    pub fn record(&mut self) -> (bool, Option<(u32, u64)>) {
        let first = self.total == 0;
        self.total += 1;
        self.in_window += 1;

        if self.window_start.elapsed().as_secs() >= 1 {
            let stats = (self.in_window, self.total);
            self.in_window = 0;
            self.window_start = Instant::now();
            (first, Some(stats))
        } else {
            (first, None)
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the interception step for one robot-role message.
///
/// Returns `true` when the message was heartbeat traffic: it has been
/// answered on the same connection and must not be forwarded.
pub async fn process_robot_message(state: &AppState, robot_id: &str, raw: &str) -> bool {
    if protocol::is_ping(raw) {
        if !state
            .registry
            .send_to_robot(robot_id, axum::extract::ws::Message::Text(protocol::PONG_TEXT.into()))
            .await
        {
            warn!("Could not answer heartbeat for {robot_id}: handle gone");
        }
        return true;
    }

    if protocol::mentions_joint_states(raw)
        && let Some(joints) = protocol::parse_joint_positions(raw)
    {
        state.registry.update_joints(&joints);
        state.events.emit(HubEvent::JointsReceived {
            joints: state.registry.current_joints(),
        });
    }

    if protocol::mentions_video_stream(raw)
        && let Some(frame) = protocol::extract_frame(raw)
    {
        let bytes = frame.len();
        state.registry.update_image(frame);
        state.events.emit(HubEvent::FrameReceived { bytes });

        let (first, stats) = state
            .frame_stats
            .lock()
            .expect("frame stats poisoned")
            .record();
        if first {
            info!("First camera frame received from {robot_id} ({bytes} bytes)");
        }
        if let Some((fps, total)) = stats {
            state.events.emit(HubEvent::FrameStats { fps, total });
        }
    }

    false
}
