//! # CableKit Core
//!
//! Core types and pure logic for cable-driven parallel robot control.
//! Provides the command model, the safety state machine shared by every
//! tier, workspace validation, and straight-line motion interpolation.

pub mod command;
pub mod error;
pub mod motion;
pub mod state;

pub use command::{Command, CommandId, CommandKind};
pub use error::{CommandError, ConnectionError, Error, ProtocolError, Result, StateError};
pub use motion::{
    is_settled, step_toward, validate_target, AxisRange, BoundsPolicy, Position, WorkspaceBounds,
    MOTION_EPSILON,
};
pub use state::{EmergencySource, OperationalState, SafetyStateMachine};
