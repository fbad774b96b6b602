//! Emergency stop input
//!
//! The firmware loop samples one digital input every tick. On a real
//! board this is a GPIO pin wired to the physical stop button; in
//! simulation and in tests it is a shared flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A sampled emergency stop input
pub trait EmergencyInput: Send {
    /// True while the stop trigger is asserted
    fn is_asserted(&self) -> bool;
}

/// Input for rigs without a physical stop button
pub struct NoEmergencyInput;

impl EmergencyInput for NoEmergencyInput {
    fn is_asserted(&self) -> bool {
        false
    }
}

/// Handle for asserting a [`SharedEmergencyPin`] from outside the loop
#[derive(Clone)]
pub struct EmergencyPinHandle {
    flag: Arc<AtomicBool>,
}

impl EmergencyPinHandle {
    /// Assert the stop trigger
    pub fn press(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Release the stop trigger
    pub fn release(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Shared-flag emergency input for simulation and tests
pub struct SharedEmergencyPin {
    flag: Arc<AtomicBool>,
}

impl SharedEmergencyPin {
    /// Create a released pin together with its external handle
    pub fn new() -> (Self, EmergencyPinHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self { flag: flag.clone() },
            EmergencyPinHandle { flag },
        )
    }
}

impl EmergencyInput for SharedEmergencyPin {
    fn is_asserted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_pin_tracks_its_handle() {
        let (pin, handle) = SharedEmergencyPin::new();
        assert!(!pin.is_asserted());
        handle.press();
        assert!(pin.is_asserted());
        handle.release();
        assert!(!pin.is_asserted());
    }
}
