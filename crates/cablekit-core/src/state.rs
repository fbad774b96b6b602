//! Safety state machine
//!
//! The operational state gating which commands are legal. Firmware owns
//! the canonical value; the relay and clients hold read replicas that
//! converge on every status broadcast. All three tiers run this same
//! transition table.

use crate::command::CommandKind;
use crate::error::StateError;
use serde::{Deserialize, Serialize};

/// Operational state of the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalState {
    /// Powered up, calibration not yet performed
    #[default]
    Uncalibrated,
    /// Calibrated and idle; motion disabled
    Ready,
    /// Motion enabled
    Active,
    /// Calibration cycle running
    Calibrating,
    /// Emergency stop latched; all motion discarded
    EmergencyStop,
}

impl std::fmt::Display for OperationalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uncalibrated => write!(f, "uncalibrated"),
            Self::Ready => write!(f, "ready"),
            Self::Active => write!(f, "active"),
            Self::Calibrating => write!(f, "calibrating"),
            Self::EmergencyStop => write!(f, "emergency_stop"),
        }
    }
}

/// What raised an emergency stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencySource {
    /// `emergency_stop` command from a client
    Software,
    /// Hardware pin edge sampled by the firmware loop
    HardwarePin,
}

/// The shared safety state machine
///
/// Tracks the operational state, whether calibration has ever completed,
/// and whether a hardware emergency trigger is still asserted. `reset`
/// out of EmergencyStop is refused while the trigger is latched.
#[derive(Debug, Clone)]
pub struct SafetyStateMachine {
    state: OperationalState,
    calibrated: bool,
    trigger_latched: bool,
}

impl SafetyStateMachine {
    /// Create a state machine in the initial Uncalibrated state
    pub fn new() -> Self {
        Self {
            state: OperationalState::Uncalibrated,
            calibrated: false,
            trigger_latched: false,
        }
    }

    /// Current operational state
    pub fn state(&self) -> OperationalState {
        self.state
    }

    /// True once a calibration cycle has completed
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// True while in EmergencyStop
    pub fn is_emergency(&self) -> bool {
        self.state == OperationalState::EmergencyStop
    }

    /// True while motion is enabled
    pub fn is_active(&self) -> bool {
        self.state == OperationalState::Active
    }

    /// Check a command against the current state and apply its transition.
    ///
    /// Returns the state after the transition. Move targets are validated
    /// separately by the workspace validator; this only checks the state
    /// gate. `emergency_stop` always wins and is handled in
    /// [`Self::emergency`], not here.
    pub fn apply(&mut self, kind: CommandKind) -> Result<OperationalState, StateError> {
        use CommandKind::*;
        use OperationalState::*;

        if kind == CommandKind::EmergencyStop {
            self.emergency(EmergencySource::Software);
            return Ok(self.state);
        }

        // Status queries never transition and are legal everywhere.
        if kind == GetStatus {
            return Ok(self.state);
        }

        let next = match (self.state, kind) {
            (OperationalState::EmergencyStop, Reset) => {
                if self.trigger_latched {
                    return Err(StateError::TriggerNotCleared);
                }
                Ready
            }
            (OperationalState::EmergencyStop, _) => return Err(StateError::EmergencyActive),

            // Reset outside an emergency is a harmless no-op.
            (s, Reset) => s,

            (Calibrating, _) => return Err(StateError::CalibrationInProgress),

            (Uncalibrated, Calibrate) | (Ready, Calibrate) => Calibrating,
            (Active, Calibrate) => {
                return Err(StateError::InvalidInState {
                    state: self.state.to_string(),
                })
            }

            (Ready, Activate) => {
                if !self.calibrated {
                    return Err(StateError::NotCalibrated);
                }
                Active
            }
            (Active, Activate) => Active,
            (Uncalibrated, Activate) => return Err(StateError::NotCalibrated),

            (Active, Deactivate) => Ready,
            (Ready, Deactivate) => Ready,
            (Uncalibrated, Deactivate) => Uncalibrated,

            (Active, Move) | (Active, Home) => Active,
            (_, Move) | (_, Home) => return Err(StateError::NotActive),

            // Handled by the early returns above.
            (_, CommandKind::EmergencyStop) | (_, GetStatus) => unreachable!(),
        };

        self.state = next;
        Ok(next)
    }

    /// Enter EmergencyStop from any state.
    ///
    /// A hardware pin edge latches the trigger; a software stop is
    /// momentary and leaves the trigger clear, so a subsequent `reset`
    /// succeeds immediately.
    pub fn emergency(&mut self, source: EmergencySource) {
        if source == EmergencySource::HardwarePin {
            self.trigger_latched = true;
        }
        self.state = OperationalState::EmergencyStop;
    }

    /// Sample the hardware emergency input.
    ///
    /// An asserted trigger enters (and keeps latched) EmergencyStop. A
    /// released trigger only unlatches; leaving EmergencyStop requires
    /// an explicit `reset`.
    pub fn sample_trigger(&mut self, asserted: bool) {
        if asserted {
            self.emergency(EmergencySource::HardwarePin);
        } else {
            self.trigger_latched = false;
        }
    }

    /// Mark a running calibration cycle as complete
    pub fn calibration_complete(&mut self) {
        if self.state == OperationalState::Calibrating {
            self.calibrated = true;
            self.state = OperationalState::Ready;
        } else {
            tracing::warn!(state = %self.state, "calibration completion outside a calibration cycle");
        }
    }

    /// Force the replica to a reported state.
    ///
    /// Used by mirrors reconciling with an authoritative status report;
    /// never called on the firmware's own instance.
    pub fn reconcile(&mut self, state: OperationalState, calibrated: bool) {
        self.state = state;
        self.calibrated = calibrated;
    }
}

impl Default for SafetyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
