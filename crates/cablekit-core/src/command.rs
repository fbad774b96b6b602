//! Command model
//!
//! A command is the unit of request/response correlation: each carries a
//! process-unique id that matches exactly one response frame.

use crate::motion::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Move the end-effector to a target position
    Move,
    /// Move to the configured home position
    Home,
    /// Start a calibration cycle
    Calibrate,
    /// Enable motion
    Activate,
    /// Disable motion
    Deactivate,
    /// Software emergency stop
    EmergencyStop,
    /// Clear an emergency stop
    Reset,
    /// Query current status
    GetStatus,
}

impl CommandKind {
    /// Wire name of the command kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Home => "home",
            Self::Calibrate => "calibrate",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::EmergencyStop => "emergency_stop",
            Self::Reset => "reset",
            Self::GetStatus => "get_status",
        }
    }

    /// True when the command carries a position payload
    pub fn takes_payload(&self) -> bool {
        matches!(self, Self::Move)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CommandKind {
    type Err = crate::error::ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "move" => Ok(Self::Move),
            "home" => Ok(Self::Home),
            "calibrate" => Ok(Self::Calibrate),
            "activate" => Ok(Self::Activate),
            "deactivate" => Ok(Self::Deactivate),
            "emergency_stop" => Ok(Self::EmergencyStop),
            "reset" => Ok(Self::Reset),
            "get_status" => Ok(Self::GetStatus),
            other => Err(crate::error::ProtocolError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }
}

/// Opaque command identifier
///
/// Millisecond timestamp plus a random suffix; unique within the process
/// lifetime and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Generate a fresh id
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", millis, &suffix[..8]))
    }

    /// Wrap an id received over the wire
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-issued command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique identifier correlating exactly one response
    pub id: CommandId,
    /// Command kind
    pub kind: CommandKind,
    /// Target position for kinds that take one
    pub payload: Option<Position>,
    /// Issue time, milliseconds since the Unix epoch
    pub issued_at: i64,
}

impl Command {
    /// Create a command with a freshly generated id
    pub fn new(kind: CommandKind, payload: Option<Position>) -> Self {
        Self {
            id: CommandId::generate(),
            kind,
            payload,
            issued_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(CommandId::generate()));
        }
    }

    #[test]
    fn kind_round_trips_through_wire_name() {
        for kind in [
            CommandKind::Move,
            CommandKind::Home,
            CommandKind::Calibrate,
            CommandKind::Activate,
            CommandKind::Deactivate,
            CommandKind::EmergencyStop,
            CommandKind::Reset,
            CommandKind::GetStatus,
        ] {
            assert_eq!(kind.as_str().parse::<CommandKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_a_protocol_error() {
        assert!("explode".parse::<CommandKind>().is_err());
    }
}
