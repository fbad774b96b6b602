//! Error handling for CableKit
//!
//! Provides error types for each layer of the stack:
//! - Command errors (submission, correlation, timeout)
//! - State errors (safety state machine rejections)
//! - Connection errors (network and serial transports)
//! - Protocol errors (malformed frames and lines)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Command error type
///
/// Represents the ways a submitted command can fail from the caller's
/// point of view. Every variant is recoverable: the caller may resubmit
/// after correcting the condition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// No response arrived within the configured deadline
    #[error("Command timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The command was rejected by the relay or firmware
    #[error("Command rejected: {reason}")]
    Rejected {
        /// The reason the command was rejected.
        reason: String,
    },

    /// The transport was closed before a response arrived
    #[error("Transport closed")]
    TransportClosed,
}

/// Safety state machine rejection
///
/// Produced when a command is not legal in the current operational state,
/// or when a move target fails workspace validation. The `Display` strings
/// are the exact reason strings carried over the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// Motion requested while the system is not in the Active state
    #[error("system not active")]
    NotActive,

    /// Command issued while a calibration cycle is running
    #[error("calibration in progress")]
    CalibrationInProgress,

    /// Activation requested before the system has been calibrated
    #[error("system not calibrated")]
    NotCalibrated,

    /// Command blocked because the system is in emergency stop
    #[error("emergency stop active")]
    EmergencyActive,

    /// Reset requested while the emergency trigger is still asserted
    #[error("emergency trigger not cleared")]
    TriggerNotCleared,

    /// Move target lies outside the configured workspace
    #[error("out of bounds: ({x:.3}, {y:.3}, {z:.3})")]
    OutOfBounds {
        /// Requested X coordinate in meters.
        x: f64,
        /// Requested Y coordinate in meters.
        y: f64,
        /// Requested Z coordinate in meters.
        z: f64,
    },

    /// Command has no meaning in the current state
    #[error("invalid in state {state}")]
    InvalidInState {
        /// Name of the current operational state.
        state: String,
    },

    /// Workspace reconfiguration with an inverted or non-finite range
    #[error("invalid bounds: min {min} > max {max}")]
    InvalidBounds {
        /// Lower bound of the offending range.
        min: f64,
        /// Upper bound of the offending range.
        max: f64,
    },
}

/// Connection error type
///
/// Represents failures of the network link to the relay or the serial
/// link to the firmware.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open the port or socket
    #[error("Failed to open {endpoint}: {reason}")]
    FailedToOpen {
        /// Port path or socket address.
        endpoint: String,
        /// The reason the open failed.
        reason: String,
    },

    /// The connection dropped unexpectedly
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Reconnection gave up after the configured number of attempts
    #[error("Reconnect attempts exhausted after {attempts} tries")]
    AttemptsExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },
}

/// Protocol error type
///
/// Represents malformed input on either wire format. Malformed input is
/// logged and dropped by the receiver; it never crashes a component.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A network frame could not be decoded
    #[error("Malformed frame: {reason}")]
    MalformedFrame {
        /// The reason decoding failed.
        reason: String,
    },

    /// A serial line could not be decoded
    #[error("Malformed line: {line}")]
    MalformedLine {
        /// The offending line.
        line: String,
    },

    /// A command kind outside the closed set
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized command name.
        command: String,
    },
}

/// Main error type for CableKit
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Safety state machine rejection
    #[error(transparent)]
    State(#[from] StateError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Command(CommandError::Timeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a state machine rejection
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::State(_) | Error::Command(CommandError::Rejected { .. })
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
