//! Configuration for the relay daemon
//!
//! Settings are organized into logical sections:
//! - Server settings (bind address for the client socket)
//! - Hardware settings (serial port, reconnect, firmware timeout)
//! - Workspace settings (reachable volume and bounds policy)
//! - Timing settings (broadcast rates)
//! - Motion settings (simulated firmware kinematics)
//!
//! Files may be TOML or JSON, stored in the platform config directory.

use crate::error::{SettingsError, SettingsResult};
use cablekit_core::{AxisRange, BoundsPolicy, Position, WorkspaceBounds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Client socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Interface to bind
    pub host: String,
    /// TCP port for client connections
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl ServerSettings {
    /// Bind address as a single string
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Firmware link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// Serial port path; `None` runs the simulated firmware instead
    pub serial_port: Option<String>,
    /// Baud rate for the serial link
    pub baud_rate: u32,
    /// Deadline for a firmware reply in milliseconds
    pub command_timeout_ms: u64,
    /// Reconnect attempts before giving up on the serial link
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            serial_port: None,
            baud_rate: 115_200,
            command_timeout_ms: 2000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Reachable workspace volume in meters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// Minimum X coordinate
    pub x_min: f64,
    /// Maximum X coordinate
    pub x_max: f64,
    /// Minimum Y coordinate
    pub y_min: f64,
    /// Maximum Y coordinate
    pub y_max: f64,
    /// Minimum Z coordinate
    pub z_min: f64,
    /// Maximum Z coordinate
    pub z_max: f64,
    /// What to do with out-of-bounds targets
    #[serde(default)]
    pub bounds_policy: BoundsPolicy,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            x_min: -2.5,
            x_max: 2.5,
            y_min: -2.5,
            y_max: 2.5,
            z_min: 0.5,
            z_max: 4.5,
            bounds_policy: BoundsPolicy::default(),
        }
    }
}

impl WorkspaceSettings {
    /// Build validated workspace bounds from the raw ranges
    pub fn to_bounds(&self) -> SettingsResult<WorkspaceBounds> {
        let range = |min: f64, max: f64, key: &str| {
            AxisRange::new(min, max).map_err(|e| SettingsError::InvalidSetting {
                key: format!("workspace.{}", key),
                reason: e.to_string(),
            })
        };
        Ok(WorkspaceBounds {
            x: range(self.x_min, self.x_max, "x")?,
            y: range(self.y_min, self.y_max, "y")?,
            z: range(self.z_min, self.z_max, "z")?,
        })
    }
}

/// Broadcast rate settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Position broadcast rate in hertz
    pub position_rate_hz: f64,
    /// Status broadcast rate in hertz
    pub status_rate_hz: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            position_rate_hz: 10.0,
            status_rate_hz: 1.0,
        }
    }
}

/// Simulated firmware kinematics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionSettings {
    /// End-effector speed in meters per second
    pub speed: f64,
    /// Control loop rate in hertz
    pub tick_rate_hz: f64,
    /// Home position X coordinate
    pub home_x: f64,
    /// Home position Y coordinate
    pub home_y: f64,
    /// Home position Z coordinate
    pub home_z: f64,
    /// Duration of a simulated calibration cycle in seconds
    pub calibration_secs: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            speed: 0.5,
            tick_rate_hz: 50.0,
            home_x: 0.0,
            home_y: 0.0,
            home_z: 2.5,
            calibration_secs: 2.0,
        }
    }
}

impl MotionSettings {
    /// Home position as a point
    pub fn home_position(&self) -> Position {
        Position::new(self.home_x, self.home_y, self.home_z)
    }
}

/// Complete relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Client socket settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Firmware link settings
    #[serde(default)]
    pub hardware: HardwareSettings,
    /// Reachable workspace volume
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    /// Broadcast rate settings
    #[serde(default)]
    pub timing: TimingSettings,
    /// Simulated firmware kinematics
    #[serde(default)]
    pub motion: MotionSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location in the platform config directory
    pub fn default_path() -> SettingsResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| SettingsError::ConfigDirectory("no config directory".to_string()))?;
        Ok(base.join("cablekit").join("config.toml"))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("failed to read {:?}: {}", path, e)))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            return Err(SettingsError::LoadError(
                "config file must be .json or .toml".to_string(),
            ));
        };

        config.validate()?;
        Ok(config)
    }

    /// Load the default config file, falling back to defaults when absent
    pub fn load_or_default() -> SettingsResult<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::info!(path = ?path, "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?
        } else {
            return Err(SettingsError::SaveError(
                "config file must be .json or .toml".to_string(),
            ));
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write a default config template at the default location.
    ///
    /// Refuses to overwrite an existing file.
    pub fn write_template() -> SettingsResult<PathBuf> {
        let path = Self::default_path()?;
        if path.exists() {
            return Err(SettingsError::SaveError(format!(
                "config file already exists at {:?}",
                path
            )));
        }
        Self::default().save_to_file(&path)?;
        Ok(path)
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let invalid = |key: &str, reason: &str| {
            Err(SettingsError::InvalidSetting {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.hardware.baud_rate == 0 {
            return invalid("hardware.baud_rate", "must be > 0");
        }
        if self.hardware.command_timeout_ms == 0 {
            return invalid("hardware.command_timeout_ms", "must be > 0");
        }

        let bounds = self.workspace.to_bounds()?;

        if !(self.timing.position_rate_hz > 0.0) {
            return invalid("timing.position_rate_hz", "must be > 0");
        }
        if !(self.timing.status_rate_hz > 0.0) {
            return invalid("timing.status_rate_hz", "must be > 0");
        }

        if !(self.motion.speed > 0.0) {
            return invalid("motion.speed", "must be > 0");
        }
        if !(self.motion.tick_rate_hz > 0.0) {
            return invalid("motion.tick_rate_hz", "must be > 0");
        }
        if !(self.motion.calibration_secs > 0.0) {
            return invalid("motion.calibration_secs", "must be > 0");
        }
        if !bounds.contains(&self.motion.home_position()) {
            return invalid("motion.home_z", "home position outside workspace");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn default_workspace_matches_rig() {
        let bounds = Config::default().workspace.to_bounds().unwrap();
        assert!(bounds.contains(&Position::new(2.5, -2.5, 4.5)));
        assert!(!bounds.contains(&Position::new(0.0, 0.0, 0.4)));
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.server.port = 9000;
        config.hardware.serial_port = Some("/dev/ttyUSB0".to_string());
        config.workspace.bounds_policy = BoundsPolicy::Clamp;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.hardware.serial_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(loaded.workspace.bounds_policy, BoundsPolicy::Clamp);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 9999\nhost = \"0.0.0.0\"\n").unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.bind_addr(), "0.0.0.0:9999");
        assert_eq!(loaded.hardware.baud_rate, 115_200);
    }

    #[test]
    fn inverted_workspace_rejected() {
        let mut config = Config::default();
        config.workspace.z_min = 5.0;
        config.workspace.z_max = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn home_outside_workspace_rejected() {
        let mut config = Config::default();
        config.motion.home_z = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server: {}").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }
}
