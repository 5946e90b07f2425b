//! RTP envelope types.
//!
//! An envelope is `{op, topic|service, type, msg|args, throttle_rate?}`.
//! Heartbeats are the degenerate `{"op":"ping"}` / `{"op":"pong"}` forms
//! with no payload at all.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialized heartbeat request, exactly as it appears on the wire.
pub const PING_TEXT: &str = r#"{"op":"ping"}"#;

/// Serialized heartbeat response.
pub const PONG_TEXT: &str = r#"{"op":"pong"}"#;

/// Protocol operation discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtpOp {
    Subscribe,
    Publish,
    CallService,
    Ping,
    Pong,
}

/// A protocol envelope.
///
/// The relay forwards most envelopes as raw text without ever constructing
/// this type; it exists for the frames the bridge and the command
/// translator build themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpEnvelope {
    pub op: RtpOp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// ROS message or service type (e.g. "sensor_msgs/JointState").
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,

    /// Payload for `publish`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,

    /// Arguments for `call_service`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Minimum milliseconds between messages on a subscription. 0 = full rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_rate: Option<u32>,
}

impl RtpEnvelope {
    /// Subscription request for a topic at the given throttle.
    pub fn subscribe(topic: &str, msg_type: &str, throttle_rate: u32) -> Self {
        Self {
            op: RtpOp::Subscribe,
            topic: Some(topic.to_string()),
            service: None,
            msg_type: Some(msg_type.to_string()),
            msg: None,
            args: None,
            throttle_rate: Some(throttle_rate),
        }
    }

    /// Publish a message to a topic.
    pub fn publish(topic: &str, msg_type: &str, msg: Value) -> Self {
        Self {
            op: RtpOp::Publish,
            topic: Some(topic.to_string()),
            service: None,
            msg_type: Some(msg_type.to_string()),
            msg: Some(msg),
            args: None,
            throttle_rate: None,
        }
    }

    /// Invoke a named service.
    pub fn call_service(service: &str, srv_type: &str, args: Value) -> Self {
        Self {
            op: RtpOp::CallService,
            topic: None,
            service: Some(service.to_string()),
            msg_type: Some(srv_type.to_string()),
            msg: None,
            args: Some(args),
            throttle_rate: None,
        }
    }

    /// Serialize to the wire form.
    pub fn to_text(&self) -> String {
        // Envelope fields are plain strings and JSON values; serialization
        // cannot fail for any value constructible through the helpers above.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Whether a raw frame carries the heartbeat-request marker.
///
/// A substring scan, not a parse: video frames run to megabytes and the
/// marker can only appear in an envelope we ourselves would have emitted.
pub fn is_ping(raw: &str) -> bool {
    raw.contains(r#""op":"ping""#)
}

/// Whether a raw frame carries the heartbeat-response marker.
pub fn is_pong(raw: &str) -> bool {
    raw.contains(r#""op":"pong""#)
}

/// Identification message the bridge sends right after connecting to the
/// relay, before any other traffic.
pub fn register_robot(robot_id: &str) -> String {
    serde_json::json!({
        "type": "registerRobot",
        "robotId": robot_id,
        "timestamp": Utc::now().to_rfc3339(),
    })
    .to_string()
}
