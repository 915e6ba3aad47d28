//! Wire protocol for the classroom session.
//!
//! Every frame on the socket is a JSON envelope `{type, content, sender}`
//! whose `content` is itself JSON-encoded payload text. Encoding and
//! decoding are two-phase (envelope first, payload second), so one bad
//! payload never takes down frame handling.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Inbound: quiz broadcast by the instructor.
pub const MSG_QUIZ: &str = "QUIZ";
/// Inbound: server acknowledged a submitted answer.
pub const MSG_ANSWER_RECEIVED: &str = "ANSWER_RECEIVED";
/// Inbound: grading verdict for a submitted answer.
pub const MSG_ANSWER_EVALUATED: &str = "ANSWER_EVALUATED";
/// Inbound: the instructor ended the session.
pub const MSG_SESSION_ENDED: &str = "SESSION_ENDED";
/// Inbound: joystick control granted.
pub const MSG_ALLOW_JOYSTICK: &str = "ALLOW_JOYSTICK";
/// Inbound: joystick control revoked.
pub const MSG_DISABLE_JOYSTICK: &str = "DISABLE_JOYSTICK";
/// Inbound: robot telemetry snapshot.
pub const MSG_ROBOT_STATUS: &str = "ROBOT_STATUS";
/// Inbound: base64-encoded map image.
pub const MSG_MAP_UPDATE: &str = "MAP_UPDATE";
/// Outbound: identity announcement, first frame after connecting.
pub const MSG_STUDENT_CONNECTION: &str = "STUDENT_CONNECTION";
/// Outbound: answer to a quiz question.
pub const MSG_ANSWER: &str = "ANSWER";
/// Outbound: joystick velocity command for the robot.
pub const MSG_ROBOT_CONTROL_VELOCITY: &str = "ROBOT_CONTROL_VELOCITY";

/// rosbridge operation carried by every velocity command.
pub const VELOCITY_OP: &str = "publish";
/// rosbridge topic the robot listens on for joystick velocities.
pub const VELOCITY_TOPIC: &str = "/cmd_vel_joystick";

/// Message envelope carried in every text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag (one of the `MSG_*` constants).
    #[serde(rename = "type")]
    pub kind: String,
    /// JSON-encoded payload text.
    pub content: String,
    /// Origin id: a student id, "professor", or "server".
    pub sender: String,
}

impl Envelope {
    /// Wrap already-encoded payload text.
    pub fn new(kind: &str, content: String, sender: &str) -> Self {
        Self {
            kind: kind.to_string(),
            content,
            sender: sender.to_string(),
        }
    }

    /// Build an envelope by JSON-encoding `payload` into `content`.
    pub fn with_payload<T: Serialize>(
        kind: &str,
        payload: &T,
        sender: &str,
    ) -> Result<Self, ProtocolError> {
        let content = serde_json::to_string(payload)
            .map_err(|e| ProtocolError::EncodeFailed(e.to_string()))?;
        Ok(Self::new(kind, content, sender))
    }

    /// Serialize the envelope to frame text.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::EncodeFailed(e.to_string()))
    }

    /// Parse frame text into an envelope.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))
    }

    /// Decode the inner payload against the schema implied by `type`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_str(&self.content).map_err(|e| ProtocolError::InvalidPayload {
            kind: self.kind.clone(),
            detail: e.to_string(),
        })
    }
}

/// Encode `payload`, wrap it in an envelope, and serialize to frame text.
pub fn encode_message<T: Serialize>(
    kind: &str,
    payload: &T,
    sender: &str,
) -> Result<String, ProtocolError> {
    Envelope::with_payload(kind, payload, sender)?.encode()
}

/// Identity sent to the server when a session opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentConnection {
    pub id: String,
    pub name: String,
}

/// Quiz broadcast by the instructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Quiz {
    /// Look up a question by id.
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

/// Single quiz question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option_index: Option<u32>,
    /// Score awarded for a correct answer.
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

/// A student's answer to one question.
///
/// `is_correct` stays `None` until the server evaluates the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    pub id: String,
    pub quiz_id: String,
    pub question_id: String,
    pub student_id: String,
    pub student_name: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

/// Robot position estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotPosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<f32>,
}

/// Robot velocity estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotVelocity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linear: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular: Option<f32>,
}

/// Robot telemetry snapshot, replaced as a whole on every update.
///
/// Wire names mix snake_case and camelCase; the renames below follow the
/// server exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
    pub mode_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_queue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_name: Option<String>,
    pub uptime: i64,
    pub errors: Vec<String>,
    #[serde(rename = "batteryPercentage")]
    pub battery_percentage: f32,
    #[serde(rename = "mapId", default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_text: Option<String>,
    pub state_id: i32,
    #[serde(rename = "stateText", default, skip_serializing_if = "Option::is_none")]
    pub state_text: Option<String>,
    pub velocity: RobotVelocity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_text: Option<String>,
    #[serde(
        rename = "batteryTimeRemaining",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub battery_time_remaining: Option<i64>,
    pub position: RobotPosition,
}

/// Three-axis vector used by velocity commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Linear/angular speed pair for the robot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedCommand {
    pub linear: Vector3,
    pub angular: Vector3,
}

/// Inner velocity payload: the speed pair plus the sender's control token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityPayload {
    pub joystick_token: String,
    pub speed_command: SpeedCommand,
}

/// rosbridge publish command addressed to the joystick velocity topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub op: String,
    pub id: String,
    pub topic: String,
    pub msg: VelocityPayload,
    pub latch: bool,
}

impl VelocityCommand {
    /// Build a publish command for a joystick reading.
    ///
    /// Forward input maps to the linear x axis, turn input to the angular
    /// z axis, matching the robot's cmd_vel convention.
    pub fn publish(id: String, topic: &str, token: &str, linear: f32, angular: f32) -> Self {
        Self {
            op: VELOCITY_OP.to_string(),
            id,
            topic: topic.to_string(),
            msg: VelocityPayload {
                joystick_token: token.to_string(),
                speed_command: SpeedCommand {
                    linear: Vector3 {
                        x: linear,
                        y: 0.0,
                        z: 0.0,
                    },
                    angular: Vector3 {
                        x: 0.0,
                        y: 0.0,
                        z: angular,
                    },
                },
            },
            latch: false,
        }
    }
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid {kind} payload: {detail}")]
    InvalidPayload { kind: String, detail: String },

    #[error("Failed to encode message: {0}")]
    EncodeFailed(String),
}
