//! Chat command translator.
//!
//! A pure lookup from normalized text tokens to an outcome: reply text for
//! the chat surface, an optional RTP payload to forward to the robot, and
//! whether the reply should attach the camera snapshot. The caller owns
//! delivery (and the failure override when the robot is offline) — nothing
//! here touches the network.

use serde_json::json;
use telehub_protocol::RtpEnvelope;

use crate::registry::JOINT_COUNT;

/// Radians added or removed by one nudge command (~11 degrees).
pub const NUDGE_STEP: f64 = 0.2;

/// First line of every chat reply.
pub const REPLY_HEADER: &str = "🤖 *Telehub Robot*\n";

const TRAJECTORY_TOPIC: &str = "/niryo_robot_follow_joint_trajectory_controller/command";
const LEARNING_MODE_SERVICE: &str = "/niryo_robot/learning_mode/activate";
const CALIBRATE_SERVICE: &str = "/niryo_robot/joints_interface/calibrate_motors";
const OPEN_GRIPPER_SERVICE: &str = "/niryo_robot/tools/open_gripper";
const CLOSE_GRIPPER_SERVICE: &str = "/niryo_robot/tools/close_gripper";

/// Result of translating one chat command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Human-readable reply, header included.
    pub reply: String,
    /// Serialized RTP payload to forward, when the command maps to one.
    pub payload: Option<String>,
    /// Whether the reply should reference the cached camera frame.
    pub wants_media: bool,
}

impl CommandOutcome {
    fn reply_only(text: &str) -> Self {
        Self {
            reply: format!("{REPLY_HEADER}{text}"),
            payload: None,
            wants_media: false,
        }
    }

    fn with_payload(text: &str, payload: String) -> Self {
        Self {
            reply: format!("{REPLY_HEADER}{text}"),
            payload: Some(payload),
            wants_media: false,
        }
    }
}

/// Canonical form of an inbound command: trimmed and lowercased.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Reply used when a command produced a payload but the target robot was
/// not connected. Replaces the action's success text entirely.
pub fn delivery_failure_reply() -> String {
    format!(
        "{REPLY_HEADER}⚠️ Command Failed: Robot is not connected to the relay server. Unable to execute."
    )
}

/// Translate a normalized command.
///
/// `joints` is the current cached vector (for nudges), `connected` the
/// target's registry state (for wording only — delivery is the caller's
/// job), `image_cached` whether a camera frame exists for `photo`.
pub fn translate(
    command: &str,
    joints: [f64; JOINT_COUNT],
    connected: bool,
    image_cached: bool,
) -> CommandOutcome {
    let mut target = joints;

    match command {
        // Absolute moves.
        "home" => CommandOutcome::with_payload(
            "Moving to HOME position... 🏠",
            trajectory_payload([0.0; JOINT_COUNT]),
        ),
        "park" => CommandOutcome::with_payload(
            "Parking robot... 🅿️",
            trajectory_payload([0.0, 0.5, -1.2, 0.0, 0.0, 0.0]),
        ),
        "wave" => CommandOutcome::with_payload(
            "Waving! 👋",
            trajectory_payload([0.0, 0.0, 0.0, 0.0, -0.5, 0.0]),
        ),

        // Incremental nudges on the cached vector.
        "left" => {
            target[0] += NUDGE_STEP;
            CommandOutcome::with_payload("Turning Left ⬅️", trajectory_payload(target))
        }
        "right" => {
            target[0] -= NUDGE_STEP;
            CommandOutcome::with_payload("Turning Right ➡️", trajectory_payload(target))
        }
        "up" => {
            // Joint 2 lifts the arm with negative angles.
            target[1] -= NUDGE_STEP;
            CommandOutcome::with_payload("Moving Up ⬆️", trajectory_payload(target))
        }
        "down" => {
            target[1] += NUDGE_STEP;
            CommandOutcome::with_payload("Moving Down ⬇️", trajectory_payload(target))
        }
        "forward" | "reach" => {
            // Joint 3 extends with negative angles.
            target[2] -= NUDGE_STEP;
            CommandOutcome::with_payload("Reaching Forward ⏭️", trajectory_payload(target))
        }
        "back" => {
            target[2] += NUDGE_STEP;
            CommandOutcome::with_payload("Pulling Back ⏮️", trajectory_payload(target))
        }

        // Modes and calibration.
        "free" | "learning" => CommandOutcome::with_payload(
            "Enabling Learning Mode (Motors OFF)... 🔓",
            RtpEnvelope::call_service(
                LEARNING_MODE_SERVICE,
                "niryo_robot_msgs/SetBool",
                json!({"value": true}),
            )
            .to_text(),
        ),
        "lock" | "work" => CommandOutcome::with_payload(
            "Disabling Learning Mode (Motors ON)... 🔒",
            RtpEnvelope::call_service(
                LEARNING_MODE_SERVICE,
                "niryo_robot_msgs/SetBool",
                json!({"value": false}),
            )
            .to_text(),
        ),
        "calibrate" => CommandOutcome::with_payload(
            "Requesting Calibration... ⚙️",
            RtpEnvelope::call_service(
                CALIBRATE_SERVICE,
                "niryo_robot_msgs/SetInt",
                json!({"value": 0}),
            )
            .to_text(),
        ),

        // Gripper.
        "open" | "release" => {
            CommandOutcome::with_payload("Opening Gripper... 👐", gripper_payload(true))
        }
        "close" | "grab" => {
            CommandOutcome::with_payload("Closing Gripper (Max Power)... ✊", gripper_payload(false))
        }

        // Utilities.
        "photo" | "pic" | "see" | "image" => {
            if image_cached {
                CommandOutcome {
                    reply: format!("{REPLY_HEADER}Here is what I see! 📸"),
                    payload: None,
                    wants_media: true,
                }
            } else {
                CommandOutcome::reply_only(
                    "Camera not active or no image received yet. 🚫\nMake sure the robot console is running.",
                )
            }
        }
        "status" => {
            if connected {
                CommandOutcome::reply_only("System Online. 🟢")
            } else {
                CommandOutcome::reply_only("System Offline. 🔴 (Server running, robot disconnected)")
            }
        }
        "help" | "menu" | "commands" | "features" => CommandOutcome::reply_only(HELP_TEXT),

        _ => {
            if connected {
                CommandOutcome::reply_only("Unknown command. Send *Help* for features.")
            } else {
                CommandOutcome::reply_only(
                    "⚠️ Warning: Robot is OFFLINE. This command might not execute.",
                )
            }
        }
    }
}

const HELP_TEXT: &str = "📋 *Robot Features*:\n\n\
    📸 *Photo* - Get camera snapshot\n\
    👋 *Wave* - Say hello\n\
    ⬅️ *Left/Right* - Rotate Base\n\
    ⬆️ *Up/Down* - Lift Arm\n\
    ⏭️ *Forward/Back* - Reach\n\
    🏠 *Home* - Reset position\n\
    🔓 *Free* - Learning Mode ON\n\
    🔒 *Lock* - Learning Mode OFF\n\
    ⚙️ *Calibrate* - Auto-Calibrate\n\
    🅿️ *Park* - Fold robot safely\n\
    ✊ *Grab* - Close gripper\n\
    👐 *Release* - Open gripper\n\
    🟢 *Status* - Check connectivity";

/// Full joint-trajectory publish moving all six joints to `positions`
/// over two seconds.
fn trajectory_payload(positions: [f64; JOINT_COUNT]) -> String {
    let joint_names: Vec<String> = (1..=JOINT_COUNT).map(|i| format!("joint_{i}")).collect();
    RtpEnvelope::publish(
        TRAJECTORY_TOPIC,
        "trajectory_msgs/JointTrajectory",
        json!({
            "header": {"seq": 0, "stamp": {"secs": 0, "nsecs": 0}, "frame_id": ""},
            "joint_names": joint_names,
            "points": [{
                "positions": positions,
                "velocities": [],
                "accelerations": [],
                "effort": [],
                "time_from_start": {"secs": 2, "nsecs": 0},
            }],
        }),
    )
    .to_text()
}

/// Gripper service call. Torque is pinned to the maximum so the tool holds
/// its grip under load.
fn gripper_payload(open: bool) -> String {
    let service = if open {
        OPEN_GRIPPER_SERVICE
    } else {
        CLOSE_GRIPPER_SERVICE
    };
    RtpEnvelope::call_service(
        service,
        "tools_interface/ToolCommand",
        json!({
            "id": 11,
            "position": if open { 100 } else { 0 },
            "speed": 100,
            "hold_torque": 1000,
            "max_torque": 1000,
        }),
    )
    .to_text()
}
