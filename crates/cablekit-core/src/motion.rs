//! Workspace validation and motion interpolation
//!
//! The validator and the interpolator are deliberately pure functions:
//! the relay uses them to pre-validate and predict, the firmware uses the
//! same code to re-validate and actuate. Both tiers therefore agree on
//! the bounds policy and on the completion epsilon.

use crate::error::StateError;
use serde::{Deserialize, Serialize};

/// Distance below which motion toward a target is considered complete.
///
/// Shared by every tier that evaluates motion so that no tier believes a
/// move is still running after another has reported completion. One
/// millimeter, in meters.
pub const MOTION_EPSILON: f64 = 1e-3;

/// End-effector position in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in meters
    pub x: f64,
    /// Y coordinate in meters
    pub y: f64,
    /// Z coordinate in meters
    pub z: f64,
}

impl Position {
    /// Create a new position
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// True when all three coordinates are finite numbers
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Inclusive range for a single axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    /// Lower bound in meters
    pub min: f64,
    /// Upper bound in meters
    pub max: f64,
}

impl AxisRange {
    /// Create a range, enforcing `min <= max`
    pub fn new(min: f64, max: f64) -> Result<Self, StateError> {
        if min > max || !min.is_finite() || !max.is_finite() {
            return Err(StateError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// True when `v` lies inside the range
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    /// Clamp `v` into the range
    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }
}

/// Axis-aligned workspace bounds
///
/// Owned by configuration; mutated only by explicit reconfiguration,
/// never by motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    /// X axis range
    pub x: AxisRange,
    /// Y axis range
    pub y: AxisRange,
    /// Z axis range
    pub z: AxisRange,
}

impl WorkspaceBounds {
    /// Create bounds from per-axis (min, max) pairs
    pub fn new(
        x: (f64, f64),
        y: (f64, f64),
        z: (f64, f64),
    ) -> Result<Self, StateError> {
        Ok(Self {
            x: AxisRange::new(x.0, x.1)?,
            y: AxisRange::new(y.0, y.1)?,
            z: AxisRange::new(z.0, z.1)?,
        })
    }

    /// True when the position lies inside the workspace on every axis
    pub fn contains(&self, p: &Position) -> bool {
        self.x.contains(p.x) && self.y.contains(p.y) && self.z.contains(p.z)
    }

    /// Clamp a position onto the workspace surface
    pub fn clamp(&self, p: &Position) -> Position {
        Position {
            x: self.x.clamp(p.x),
            y: self.y.clamp(p.y),
            z: self.z.clamp(p.z),
        }
    }
}

impl Default for WorkspaceBounds {
    /// A 5 m x 5 m frame with the effector suspended between 0.5 m and 4.5 m
    fn default() -> Self {
        Self {
            x: AxisRange { min: -2.5, max: 2.5 },
            y: AxisRange { min: -2.5, max: 2.5 },
            z: AxisRange { min: 0.5, max: 4.5 },
        }
    }
}

/// Out-of-bounds handling policy
///
/// Exactly one policy is configured for the whole system and applied by
/// every tier that validates a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundsPolicy {
    /// Reject out-of-bounds targets with an explicit error
    #[default]
    Reject,
    /// Silently clamp out-of-bounds targets onto the workspace surface
    Clamp,
}

/// Validate a requested target against the workspace bounds.
///
/// Returns the accepted position (identical to the input, or clamped
/// under [`BoundsPolicy::Clamp`]) or a rejection. Non-finite targets are
/// always rejected regardless of policy.
pub fn validate_target(
    target: &Position,
    bounds: &WorkspaceBounds,
    policy: BoundsPolicy,
) -> Result<Position, StateError> {
    if !target.is_finite() {
        return Err(StateError::OutOfBounds {
            x: target.x,
            y: target.y,
            z: target.z,
        });
    }

    if bounds.contains(target) {
        return Ok(*target);
    }

    match policy {
        BoundsPolicy::Clamp => Ok(bounds.clamp(target)),
        BoundsPolicy::Reject => Err(StateError::OutOfBounds {
            x: target.x,
            y: target.y,
            z: target.z,
        }),
    }
}

/// Advance `current` toward `target` by one tick.
///
/// Moves along the straight-line vector by `min(speed * dt, remaining)`.
/// All axes arrive together; there is no per-axis completion. Returns the
/// target itself once the remaining distance falls below
/// [`MOTION_EPSILON`].
pub fn step_toward(current: &Position, target: &Position, speed: f64, dt: f64) -> Position {
    let remaining = current.distance_to(target);
    if remaining < MOTION_EPSILON {
        return *target;
    }

    let step = (speed * dt).min(remaining);
    let scale = step / remaining;
    Position {
        x: current.x + (target.x - current.x) * scale,
        y: current.y + (target.y - current.y) * scale,
        z: current.z + (target.z - current.z) * scale,
    }
}

/// True when motion from `current` to `target` is complete
pub fn is_settled(current: &Position, target: &Position) -> bool {
    current.distance_to(target) < MOTION_EPSILON
}
