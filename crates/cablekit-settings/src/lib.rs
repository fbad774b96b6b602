//! # CableKit Settings
//!
//! Configuration handling for the relay daemon: typed sections with
//! defaults, TOML/JSON persistence in the platform config directory,
//! and validation before anything touches the hardware.

pub mod config;
pub mod error;

pub use config::{
    Config, HardwareSettings, MotionSettings, ServerSettings, TimingSettings, WorkspaceSettings,
};
pub use error::{SettingsError, SettingsResult};
