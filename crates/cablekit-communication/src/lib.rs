//! # CableKit Communication
//!
//! Wire protocols and transport links for CableKit.
//! Covers both sides of the relay: the JSON frame protocol spoken with
//! network clients and the line-oriented ASCII protocol spoken with the
//! motor-control firmware, plus the client-side command channel with
//! request correlation, timeouts, and offline queueing.

pub mod channel;
pub mod link;
pub mod protocol;
pub mod serial;

pub use channel::{CommandChannel, CommandChannelConfig, ResponseData};
pub use link::{LinkEvent, LinkState, NetworkLink, ReconnectPolicy};
pub use protocol::frames::{
    decode_client_bound, decode_command_frame, now_millis, BroadcastFrame, CalibrationOutcome,
    ClientBound, CommandFrame, ErrorData, FrameDecodeError, ResponseFrame, StatusSnapshot,
};
pub use protocol::wire::{DeviceCommand, DeviceReply, WireStatus};
pub use serial::{
    list_ports, memory_pair, open_port, LineTransport, MemoryPort, ReadWrite, SerialPortInfo,
};
