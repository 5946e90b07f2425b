//! Canonical wire-protocol types for the telehub relay.
//!
//! The robot speaks a rosbridge-style JSON-over-WebSocket protocol: every
//! frame is an envelope selecting an operation (`subscribe`, `publish`,
//! `call_service`, `ping`, `pong`) on a named topic or service. The relay
//! and the bridge treat most traffic as opaque text; the helpers here cover
//! the envelopes they build themselves and the handful of topics they
//! intercept.

mod envelope;
mod telemetry;

pub use envelope::{
    RtpEnvelope, RtpOp, PING_TEXT, PONG_TEXT, is_ping, is_pong, register_robot,
};
pub use telemetry::{
    JOINT_STATES_TOPIC, VIDEO_STREAM_TOPIC, extract_frame, mentions_joint_states,
    mentions_video_stream, parse_joint_positions,
};
