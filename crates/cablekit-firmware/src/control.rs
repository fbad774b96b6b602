//! Firmware control loop
//!
//! Owns the canonical safety state machine and end-effector position.
//! Each service pass samples the emergency input, executes any complete
//! command lines, and advances motion by one tick. The loop speaks the
//! ASCII line protocol over any byte stream, so the same code runs
//! against a real serial port and the in-memory pair used in
//! simulation.

use cablekit_communication::{DeviceCommand, DeviceReply, LineTransport, ReadWrite, WireStatus};
use cablekit_core::{
    is_settled, step_toward, validate_target, BoundsPolicy, CommandKind, Position, Result,
    SafetyStateMachine, WorkspaceBounds,
};
use std::time::Duration;

use crate::pins::EmergencyInput;

/// Firmware loop configuration
#[derive(Debug, Clone, Copy)]
pub struct FirmwareConfig {
    /// Reachable workspace volume
    pub bounds: WorkspaceBounds,
    /// Out-of-bounds handling policy
    pub policy: BoundsPolicy,
    /// End-effector speed in meters per second
    pub speed: f64,
    /// Control loop rate in hertz
    pub tick_rate_hz: f64,
    /// Home position
    pub home: Position,
    /// Duration of a calibration cycle in seconds
    pub calibration_secs: f64,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            bounds: WorkspaceBounds::default(),
            policy: BoundsPolicy::default(),
            speed: 0.5,
            tick_rate_hz: 50.0,
            home: Position::new(0.0, 0.0, 2.5),
            calibration_secs: 2.0,
        }
    }
}

impl FirmwareConfig {
    /// Tick period derived from the loop rate
    pub fn tick(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz)
    }
}

/// The motor-control firmware loop
pub struct FirmwareLoop {
    transport: LineTransport,
    trigger: Box<dyn EmergencyInput>,
    config: FirmwareConfig,
    sm: SafetyStateMachine,
    position: Position,
    target: Option<Position>,
    calibration_ticks: Option<u32>,
}

impl FirmwareLoop {
    /// Create a loop over a byte stream; the effector starts at home
    pub fn new(
        stream: Box<dyn ReadWrite>,
        trigger: Box<dyn EmergencyInput>,
        config: FirmwareConfig,
    ) -> Self {
        Self {
            transport: LineTransport::new(stream),
            trigger,
            sm: SafetyStateMachine::new(),
            position: config.home,
            target: None,
            calibration_ticks: None,
            config,
        }
    }

    /// Current end-effector position
    pub fn position(&self) -> Position {
        self.position
    }

    /// Run one service pass: sample the trigger, execute pending
    /// commands, advance motion by one tick.
    pub fn service(&mut self) -> Result<()> {
        let was_emergency = self.sm.is_emergency();
        self.sm.sample_trigger(self.trigger.is_asserted());
        if self.sm.is_emergency() && !was_emergency {
            tracing::warn!("hardware emergency trigger asserted");
            self.halt();
            self.transport
                .write_line(&DeviceReply::Status(WireStatus::Emergency).encode())?;
        }

        for line in self.transport.poll_lines()? {
            self.execute(&line)?;
        }

        self.tick_motion()?;
        Ok(())
    }

    /// Run service passes at the configured tick rate until the link
    /// goes away.
    pub fn run(&mut self) -> Result<()> {
        let tick = self.config.tick();
        loop {
            match self.service() {
                Ok(()) => std::thread::sleep(tick),
                Err(e) if e.is_connection_error() => {
                    tracing::info!("firmware link closed, stopping loop");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Discard motion state
    fn halt(&mut self) {
        self.target = None;
        self.calibration_ticks = None;
    }

    /// Execute one command line and write its single direct reply
    fn execute(&mut self, line: &str) -> Result<()> {
        let command = match DeviceCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("dropping malformed command line: {}", e);
                return self.reply(DeviceReply::Error(e.to_string()));
            }
        };
        tracing::debug!(command = %command, "executing");

        match command {
            DeviceCommand::GetPos => self.reply(DeviceReply::Pos(self.position)),

            DeviceCommand::Move(requested) => match self.sm.apply(CommandKind::Move) {
                Ok(_) => {
                    match validate_target(&requested, &self.config.bounds, self.config.policy) {
                        Ok(accepted) => {
                            self.target = Some(accepted);
                            self.reply(DeviceReply::Pos(accepted))
                        }
                        Err(e) => self.reply(DeviceReply::Error(e.to_string())),
                    }
                }
                Err(e) => self.reply(DeviceReply::Error(e.to_string())),
            },

            DeviceCommand::Home => match self.sm.apply(CommandKind::Home) {
                Ok(_) => {
                    self.target = Some(self.config.home);
                    self.reply(DeviceReply::Pos(self.config.home))
                }
                Err(e) => self.reply(DeviceReply::Error(e.to_string())),
            },

            DeviceCommand::Calibrate => match self.sm.apply(CommandKind::Calibrate) {
                Ok(state) => {
                    let ticks =
                        (self.config.calibration_secs * self.config.tick_rate_hz).ceil() as u32;
                    self.calibration_ticks = Some(ticks);
                    self.target = Some(self.config.home);
                    self.reply(DeviceReply::Status(WireStatus::from_state(state)))
                }
                Err(e) => self.reply(DeviceReply::Error(e.to_string())),
            },

            DeviceCommand::EmergencyStop => {
                let state = self
                    .sm
                    .apply(CommandKind::EmergencyStop)
                    .unwrap_or(self.sm.state());
                self.halt();
                self.reply(DeviceReply::Status(WireStatus::from_state(state)))
            }

            DeviceCommand::Activate => self.apply_and_report(CommandKind::Activate),
            DeviceCommand::Deactivate => {
                // Leaving Active stops any motion in progress.
                let result = self.apply_and_report(CommandKind::Deactivate);
                if !self.sm.is_active() {
                    self.target = None;
                }
                result
            }
            DeviceCommand::ResetEmergency => self.apply_and_report(CommandKind::Reset),
        }
    }

    fn apply_and_report(&mut self, kind: CommandKind) -> Result<()> {
        match self.sm.apply(kind) {
            Ok(state) => self.reply(DeviceReply::Status(WireStatus::from_state(state))),
            Err(e) => self.reply(DeviceReply::Error(e.to_string())),
        }
    }

    fn reply(&mut self, reply: DeviceReply) -> Result<()> {
        self.transport.write_line(&reply.encode())
    }

    /// Advance motion and any running calibration cycle by one tick
    fn tick_motion(&mut self) -> Result<()> {
        if self.sm.is_emergency() {
            return Ok(());
        }

        if let Some(target) = self.target {
            let dt = 1.0 / self.config.tick_rate_hz;
            self.position = step_toward(&self.position, &target, self.config.speed, dt);
            if is_settled(&self.position, &target) {
                self.position = target;
                self.target = None;
            }
        }

        if let Some(remaining) = self.calibration_ticks {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 && is_settled(&self.position, &self.config.home) {
                self.calibration_ticks = None;
                self.sm.calibration_complete();
                tracing::info!("calibration cycle complete");
                self.transport.write_line(&DeviceReply::Calibrated.encode())?;
            } else {
                self.calibration_ticks = Some(remaining.max(1));
            }
        }
        Ok(())
    }
}
