//! Tolerant decoders for the two intercepted telemetry topics.
//!
//! The robot side does not guarantee a fixed schema: joint positions have
//! been observed both as a flat array and as an object with named fields,
//! and camera frames arrive as a base64 string buried in a message that is
//! too large to be worth parsing as JSON. Every decoder here returns
//! `Option` — a miss means "not interceptable", never an error, and the
//! caller forwards the raw frame regardless.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

/// Joint telemetry topic.
pub const JOINT_STATES_TOPIC: &str = "/joint_states";

/// Compressed camera stream topic.
pub const VIDEO_STREAM_TOPIC: &str = "/niryo_robot_vision/compressed_video_stream";

/// Frames shorter than this cannot hold a real image payload; the `data`
/// field also appears in tiny status messages we must not decode.
const MIN_FRAME_B64_LEN: usize = 100;

/// Cheap topic marker for joint telemetry.
pub fn mentions_joint_states(raw: &str) -> bool {
    raw.contains("joint_states")
}

/// Cheap topic marker for the camera stream (the robot has been seen
/// emitting the topic with mixed casing).
pub fn mentions_video_stream(raw: &str) -> bool {
    raw.contains("compressed_video_stream") || raw.contains("Compressed_Video_Stream")
}

/// Extract joint positions from a `publish` envelope on the joint topic.
///
/// Accepts `msg.position` as a numeric array (any length — the caller
/// truncates to six) or as an object with `joint_1..joint_6` / `j1..j6`
/// fields. Returns `None` on malformed JSON or an unrecognized shape.
pub fn parse_joint_positions(raw: &str) -> Option<Vec<f64>> {
    let doc: Value = serde_json::from_str(raw).ok()?;
    let position = doc.get("msg")?.get("position")?;

    match position {
        Value::Array(items) => {
            let joints: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            if joints.is_empty() { None } else { Some(joints) }
        }
        Value::Object(fields) => {
            for prefix in ["joint_", "j"] {
                let named: Vec<f64> = (1..=6)
                    .map_while(|i| fields.get(&format!("{prefix}{i}")).and_then(Value::as_f64))
                    .collect();
                if !named.is_empty() {
                    return Some(named);
                }
            }
            None
        }
        _ => None,
    }
}

/// Extract and decode the base64 image payload of a camera frame.
///
/// Scans for the quoted string value of the `data` field rather than
/// parsing the whole multi-megabyte message.
pub fn extract_frame(raw: &str) -> Option<Vec<u8>> {
    let data_idx = raw.find("\"data\"")?;
    let after_key = &raw[data_idx + "\"data\"".len()..];
    let colon = after_key.find(':')?;
    let after_colon = &after_key[colon + 1..];
    let open_quote = after_colon.find('"')?;
    let value = &after_colon[open_quote + 1..];
    let close_quote = value.find('"')?;
    let b64 = &value[..close_quote];

    if b64.len() <= MIN_FRAME_B64_LEN {
        return None;
    }
    BASE64.decode(b64).ok()
}
