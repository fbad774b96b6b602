//! Firmware line protocol
//!
//! ASCII lines terminated by `\n`. Commands flow relay to firmware,
//! replies flow back. Lines carry no ids; correlation is positional
//! with a single command in flight.

use cablekit_core::{CommandKind, OperationalState, Position, ProtocolError};
use std::fmt;

/// A command line sent to the firmware
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    /// `MOVE:x,y,z` with three decimals per axis
    Move(Position),
    /// `ACTIVATE`
    Activate,
    /// `DEACTIVATE`
    Deactivate,
    /// `EMERGENCY_STOP`
    EmergencyStop,
    /// `HOME`
    Home,
    /// `CALIBRATE`
    Calibrate,
    /// `GET_POS`
    GetPos,
    /// `RESET_EMERGENCY`
    ResetEmergency,
}

impl DeviceCommand {
    /// Encode as a wire line (no trailing newline)
    pub fn encode(&self) -> String {
        match self {
            Self::Move(p) => format!("MOVE:{:.3},{:.3},{:.3}", p.x, p.y, p.z),
            Self::Activate => "ACTIVATE".to_string(),
            Self::Deactivate => "DEACTIVATE".to_string(),
            Self::EmergencyStop => "EMERGENCY_STOP".to_string(),
            Self::Home => "HOME".to_string(),
            Self::Calibrate => "CALIBRATE".to_string(),
            Self::GetPos => "GET_POS".to_string(),
            Self::ResetEmergency => "RESET_EMERGENCY".to_string(),
        }
    }

    /// Parse a received wire line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if let Some(coords) = line.strip_prefix("MOVE:") {
            return Ok(Self::Move(parse_triplet(coords).ok_or_else(|| {
                ProtocolError::MalformedLine {
                    line: line.to_string(),
                }
            })?));
        }
        match line {
            "ACTIVATE" => Ok(Self::Activate),
            "DEACTIVATE" => Ok(Self::Deactivate),
            "EMERGENCY_STOP" => Ok(Self::EmergencyStop),
            "HOME" => Ok(Self::Home),
            "CALIBRATE" => Ok(Self::Calibrate),
            "GET_POS" => Ok(Self::GetPos),
            "RESET_EMERGENCY" => Ok(Self::ResetEmergency),
            other => Err(ProtocolError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }

    /// Map a client command kind onto the wire command it becomes.
    ///
    /// `get_status` is answered from the relay's status mirror but still
    /// refreshes the mirrored position, so it maps to `GET_POS`.
    pub fn from_request(kind: CommandKind, target: Option<Position>) -> Option<Self> {
        match kind {
            CommandKind::Move => target.map(Self::Move),
            CommandKind::Home => Some(Self::Home),
            CommandKind::Calibrate => Some(Self::Calibrate),
            CommandKind::Activate => Some(Self::Activate),
            CommandKind::Deactivate => Some(Self::Deactivate),
            CommandKind::EmergencyStop => Some(Self::EmergencyStop),
            CommandKind::Reset => Some(Self::ResetEmergency),
            CommandKind::GetStatus => Some(Self::GetPos),
        }
    }

    /// True when the firmware answers this command with a `POS:` line
    /// rather than a `STATUS:` line.
    pub fn expects_position_reply(&self) -> bool {
        matches!(self, Self::Move(_) | Self::Home | Self::GetPos)
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Coarse status reported on the firmware wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStatus {
    /// Calibrated, motion disabled
    Ready,
    /// Motion enabled
    Active,
    /// Emergency stop latched
    Emergency,
    /// Not calibrated (or calibrating)
    Inactive,
}

impl WireStatus {
    /// Wire token for the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Active => "ACTIVE",
            Self::Emergency => "EMERGENCY",
            Self::Inactive => "INACTIVE",
        }
    }

    /// Collapse an operational state onto the wire vocabulary.
    ///
    /// The wire does not distinguish Uncalibrated from Calibrating; both
    /// report INACTIVE. Receivers that care track calibration locally.
    pub fn from_state(state: OperationalState) -> Self {
        match state {
            OperationalState::Ready => Self::Ready,
            OperationalState::Active => Self::Active,
            OperationalState::EmergencyStop => Self::Emergency,
            OperationalState::Uncalibrated | OperationalState::Calibrating => Self::Inactive,
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "READY" => Some(Self::Ready),
            "ACTIVE" => Some(Self::Active),
            "EMERGENCY" => Some(Self::Emergency),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for WireStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reply line from the firmware
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReply {
    /// `POS:x,y,z`
    Pos(Position),
    /// `STATUS:token`
    Status(WireStatus),
    /// `CALIBRATED`, end of a calibration cycle
    Calibrated,
    /// `ERROR:message`
    Error(String),
}

impl DeviceReply {
    /// Encode as a wire line (no trailing newline)
    pub fn encode(&self) -> String {
        match self {
            Self::Pos(p) => format!("POS:{:.3},{:.3},{:.3}", p.x, p.y, p.z),
            Self::Status(s) => format!("STATUS:{}", s),
            Self::Calibrated => "CALIBRATED".to_string(),
            Self::Error(msg) => format!("ERROR:{}", msg),
        }
    }

    /// Parse a received wire line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if let Some(coords) = line.strip_prefix("POS:") {
            return parse_triplet(coords).map(Self::Pos).ok_or_else(|| {
                ProtocolError::MalformedLine {
                    line: line.to_string(),
                }
            });
        }
        if let Some(token) = line.strip_prefix("STATUS:") {
            return WireStatus::parse(token).map(Self::Status).ok_or_else(|| {
                ProtocolError::MalformedLine {
                    line: line.to_string(),
                }
            });
        }
        if let Some(msg) = line.strip_prefix("ERROR:") {
            return Ok(Self::Error(msg.to_string()));
        }
        if line == "CALIBRATED" {
            return Ok(Self::Calibrated);
        }
        Err(ProtocolError::MalformedLine {
            line: line.to_string(),
        })
    }
}

impl fmt::Display for DeviceReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Parse exactly three comma-separated floats
fn parse_triplet(s: &str) -> Option<Position> {
    let mut parts = s.split(',');
    let x = parts.next()?.trim().parse::<f64>().ok()?;
    let y = parts.next()?.trim().parse::<f64>().ok()?;
    let z = parts.next()?.trim().parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Position::new(x, y, z))
}
