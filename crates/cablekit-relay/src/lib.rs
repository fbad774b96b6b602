//! # CableKit Relay
//!
//! The relay daemon between network clients and the motor firmware.
//! Serializes commands onto the id-less serial wire, mirrors the
//! firmware's status, answers clients with correlated responses, and
//! broadcasts position and status at fixed rates.

pub mod broadcast;
pub mod hardware;
pub mod relay;
pub mod server;

pub use broadcast::spawn_broadcasters;
pub use hardware::{
    HardwareHandle, HardwareRequest, HardwareResult, HardwareService, PortFactory, RelayEvent,
};
pub use relay::{Relay, RelayHandle};
pub use server::{dispatch_command, run_server, ClientRegistry, Dispatch, ServerContext};
