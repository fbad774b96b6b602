//! # CableKit
//!
//! Command and control for a cable-driven parallel robot: network
//! clients issue JSON-framed commands to a relay daemon, which
//! serializes them onto a line-oriented serial protocol spoken by the
//! motor-control firmware.
//!
//! ## Architecture
//!
//! CableKit is organized as a workspace with multiple crates:
//!
//! 1. **cablekit-core** - Command model, safety state machine, workspace
//!    validation, motion interpolation
//! 2. **cablekit-communication** - Both wire protocols, the serial and
//!    network transports, and the client command channel
//! 3. **cablekit-settings** - Configuration loading and validation
//! 4. **cablekit-firmware** - The motor-control firmware loop
//! 5. **cablekit-relay** - The relay daemon bridging clients to firmware
//! 6. **cablekit** - Main binary running the relay

pub use cablekit_core::{
    is_settled, step_toward, validate_target, AxisRange, BoundsPolicy, Command, CommandError,
    CommandId, CommandKind, ConnectionError, EmergencySource, Error, OperationalState, Position,
    ProtocolError, Result, SafetyStateMachine, StateError, WorkspaceBounds, MOTION_EPSILON,
};

pub use cablekit_communication::{
    decode_client_bound, decode_command_frame, list_ports, BroadcastFrame, CalibrationOutcome,
    ClientBound, CommandChannel, CommandChannelConfig, CommandFrame, DeviceCommand, DeviceReply,
    LinkEvent, LinkState, NetworkLink, ReconnectPolicy, ResponseFrame, StatusSnapshot, WireStatus,
};

pub use cablekit_firmware::{FirmwareConfig, FirmwareLoop};
pub use cablekit_relay::{Relay, RelayHandle};
pub use cablekit_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
