//! # CableKit Firmware
//!
//! The motor-control firmware loop: canonical safety state, workspace
//! re-validation, and straight-line motion, driven by the ASCII line
//! protocol. Runs on a real serial link or on the in-memory pair used
//! by the simulated rig.

pub mod control;
pub mod pins;

pub use control::{FirmwareConfig, FirmwareLoop};
pub use pins::{EmergencyInput, EmergencyPinHandle, NoEmergencyInput, SharedEmergencyPin};
