//! Network frame protocol
//!
//! Newline-delimited JSON over a persistent connection. Three frame
//! families exist: command frames (client to relay), response frames
//! (relay to client, correlated by id), and broadcast frames (relay to
//! client, unsolicited).

use cablekit_core::{Command, CommandId, CommandKind, Position, ProtocolError};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, used as the frame timestamp
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A command frame from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Command id, echoed verbatim in the response
    pub id: CommandId,
    /// Always the literal `"command"`
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Command kind
    pub command: CommandKind,
    /// Target position for kinds that take one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Position>,
    /// Client-side issue time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl CommandFrame {
    /// Build a frame from a command
    pub fn from_command(command: &Command) -> Self {
        Self {
            id: command.id.clone(),
            frame_type: "command".to_string(),
            command: command.kind,
            data: command.payload,
            timestamp: command.issued_at,
        }
    }

    /// Serialize to a single JSON line (no trailing newline)
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Response to a command frame, matched by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the originating command
    pub id: CommandId,
    /// Whether the command succeeded
    pub success: bool,
    /// Optional result payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure reason when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    /// Successful response
    pub fn ok(id: CommandId, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Failed response
    pub fn err(id: CommandId, reason: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(reason.into()),
        }
    }

    /// Serialize to a single JSON line (no trailing newline)
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Snapshot of the mirrored robot status, as broadcast to clients
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Last reported end-effector position
    pub position: Position,
    /// Whether the relay can reach the firmware
    pub is_connected: bool,
    /// Whether a calibration cycle has completed
    pub is_calibrated: bool,
    /// Whether an emergency stop is latched
    pub emergency_stop: bool,
    /// Whether motion is enabled
    pub system_active: bool,
}

/// Payload of an unsolicited error frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Human-readable error message
    pub message: String,
}

/// Payload of a calibration result frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    /// Whether calibration completed successfully
    pub success: bool,
    /// Failure reason when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Unsolicited frames from the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastFrame {
    /// Periodic position report
    PositionUpdate {
        /// Current position
        data: Position,
        /// Send time, milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// Periodic full status report
    StatusUpdate {
        /// Current status snapshot
        data: StatusSnapshot,
        /// Send time, milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// Fault not tied to any command
    Error {
        /// Error payload
        data: ErrorData,
        /// Send time, milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// Result of a calibration cycle
    CalibrationResult {
        /// Calibration outcome
        data: CalibrationOutcome,
        /// Send time, milliseconds since the Unix epoch
        timestamp: i64,
    },
}

impl BroadcastFrame {
    /// Serialize to a single JSON line (no trailing newline)
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Any frame a client can receive
#[derive(Debug, Clone, PartialEq)]
pub enum ClientBound {
    /// Response correlated to a submitted command
    Response(ResponseFrame),
    /// Unsolicited broadcast
    Broadcast(BroadcastFrame),
}

/// Decode a line received by a client.
///
/// Frames carrying a `type` field are broadcasts; frames carrying an
/// `id` are responses. Anything else is malformed and dropped by the
/// caller.
pub fn decode_client_bound(line: &str) -> Result<ClientBound, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::MalformedFrame {
            reason: e.to_string(),
        })?;

    if value.get("type").is_some() {
        let frame = serde_json::from_value::<BroadcastFrame>(value).map_err(|e| {
            ProtocolError::MalformedFrame {
                reason: e.to_string(),
            }
        })?;
        return Ok(ClientBound::Broadcast(frame));
    }

    if value.get("id").is_some() {
        let frame = serde_json::from_value::<ResponseFrame>(value).map_err(|e| {
            ProtocolError::MalformedFrame {
                reason: e.to_string(),
            }
        })?;
        return Ok(ClientBound::Response(frame));
    }

    Err(ProtocolError::MalformedFrame {
        reason: "frame has neither type nor id".to_string(),
    })
}

/// Command frame decode failure
///
/// Carries the frame id when one could be extracted, so the receiver can
/// still answer the offending command with an error response.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDecodeError {
    /// Frame id, when present in the malformed input
    pub id: Option<CommandId>,
    /// What went wrong
    pub error: ProtocolError,
}

/// Decode a command frame received by the relay.
///
/// Command kinds outside the closed set are rejected here, before the
/// command can reach the hardware queue.
pub fn decode_command_frame(line: &str) -> Result<CommandFrame, FrameDecodeError> {
    #[derive(Deserialize)]
    struct RawFrame {
        id: String,
        #[serde(rename = "type")]
        frame_type: String,
        command: String,
        #[serde(default)]
        data: Option<Position>,
        #[serde(default)]
        timestamp: i64,
    }

    let raw: RawFrame = serde_json::from_str(line).map_err(|e| FrameDecodeError {
        id: None,
        error: ProtocolError::MalformedFrame {
            reason: e.to_string(),
        },
    })?;

    let id = CommandId::from_wire(raw.id);

    if raw.frame_type != "command" {
        return Err(FrameDecodeError {
            id: Some(id),
            error: ProtocolError::MalformedFrame {
                reason: format!("unexpected frame type: {}", raw.frame_type),
            },
        });
    }

    let command = raw.command.parse::<CommandKind>().map_err(|e| FrameDecodeError {
        id: Some(id.clone()),
        error: e,
    })?;

    if command.takes_payload() && raw.data.is_none() {
        return Err(FrameDecodeError {
            id: Some(id),
            error: ProtocolError::MalformedFrame {
                reason: "move command without a target".to_string(),
            },
        });
    }

    Ok(CommandFrame {
        id,
        frame_type: raw.frame_type,
        command,
        data: raw.data,
        timestamp: raw.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_json_shape() {
        let frame = CommandFrame {
            id: CommandId::from_wire("42-aa"),
            frame_type: "command".to_string(),
            command: CommandKind::Move,
            data: Some(Position::new(1.0, 0.0, 2.0)),
            timestamp: 1000,
        };
        let json: serde_json::Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["command"], "move");
        assert_eq!(json["data"]["z"], 2.0);
    }

    #[test]
    fn decode_command_frame_accepts_well_formed_move() {
        let line = r#"{"id":"7-x","type":"command","command":"move","data":{"x":1.0,"y":0.5,"z":2.0},"timestamp":5}"#;
        let frame = decode_command_frame(line).unwrap();
        assert_eq!(frame.command, CommandKind::Move);
        assert_eq!(frame.data.unwrap(), Position::new(1.0, 0.5, 2.0));
    }

    #[test]
    fn decode_command_frame_rejects_unknown_kind_with_id() {
        let line = r#"{"id":"7-x","type":"command","command":"teleport","timestamp":5}"#;
        let err = decode_command_frame(line).unwrap_err();
        assert_eq!(err.id, Some(CommandId::from_wire("7-x")));
        assert!(matches!(err.error, ProtocolError::UnknownCommand { .. }));
    }

    #[test]
    fn decode_command_frame_rejects_move_without_target() {
        let line = r#"{"id":"7-x","type":"command","command":"move","timestamp":5}"#;
        assert!(decode_command_frame(line).is_err());
    }

    #[test]
    fn client_bound_dispatches_on_type_then_id() {
        let response = r#"{"id":"9-y","success":true}"#;
        assert!(matches!(
            decode_client_bound(response).unwrap(),
            ClientBound::Response(_)
        ));

        let broadcast =
            r#"{"type":"position_update","data":{"x":0.0,"y":0.0,"z":2.5},"timestamp":1}"#;
        assert!(matches!(
            decode_client_bound(broadcast).unwrap(),
            ClientBound::Broadcast(BroadcastFrame::PositionUpdate { .. })
        ));

        assert!(decode_client_bound("{}").is_err());
        assert!(decode_client_bound("not json").is_err());
    }

    #[test]
    fn status_update_round_trips() {
        let frame = BroadcastFrame::StatusUpdate {
            data: StatusSnapshot {
                position: Position::new(0.0, 0.0, 2.5),
                is_connected: true,
                is_calibrated: true,
                emergency_stop: false,
                system_active: true,
            },
            timestamp: now_millis(),
        };
        let decoded = decode_client_bound(&frame.encode()).unwrap();
        assert_eq!(decoded, ClientBound::Broadcast(frame));
    }
}
