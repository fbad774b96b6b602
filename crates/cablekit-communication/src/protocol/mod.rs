//! Wire formats for both transports
//!
//! `frames` is the JSON protocol between clients and the relay;
//! `wire` is the ASCII line protocol between the relay and the firmware.

pub mod frames;
pub mod wire;
