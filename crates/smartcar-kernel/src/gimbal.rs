//! Pan/tilt camera gimbal.

use std::sync::{Arc, Mutex, PoisonError};

use smartcar_types::{CarError, GimbalState};
use tracing::{debug, warn};

use crate::motion::ServoBus;

/// PCA9685 channels driving the two gimbal servos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GimbalChannels {
    pub pan: u8,
    pub tilt: u8,
}

impl Default for GimbalChannels {
    fn default() -> Self {
        Self { pan: 9, tilt: 10 }
    }
}

/// Owns [`GimbalState`] and writes it to the servos.
///
/// The state is updated and clamped before any servo is touched, so a failed
/// write leaves the recorded pose ahead of the hardware rather than
/// corrupting it; the next successful adjustment catches up.
pub struct GimbalController {
    servos: Arc<dyn ServoBus>,
    channels: GimbalChannels,
    state: Mutex<GimbalState>,
    /// Orders servo writes so they land in the same order as state updates.
    apply: Mutex<()>,
}

impl GimbalController {
    pub fn new(servos: Arc<dyn ServoBus>, channels: GimbalChannels, initial: GimbalState) -> Self {
        Self {
            servos,
            channels,
            state: Mutex::new(initial),
            apply: Mutex::new(()),
        }
    }

    pub fn state(&self) -> GimbalState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move by `(dx, dy)` stick units of 5° each. Positive `dy` lowers the
    /// tilt angle.
    pub fn adjust(&self, dx: f64, dy: f64) -> GimbalState {
        let _apply = self.apply.lock().unwrap_or_else(PoisonError::into_inner);
        let next = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state = state.apply_delta(dx, dy);
            *state
        };
        debug!(angle_h = next.angle_h, angle_v = next.angle_v, "gimbal adjust");
        self.write(next);
        next
    }

    /// Drive both servos to the recorded pose, e.g. at startup.
    pub fn center(&self) -> GimbalState {
        let _apply = self.apply.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.state();
        self.write(state);
        state
    }

    // Each axis is written independently so one failing servo does not
    // freeze the other.
    fn write(&self, state: GimbalState) {
        if let Err(e) = self.servos.set_servo_angle(self.channels.pan, state.angle_h) {
            log_servo_failure("pan", &e);
        }
        if let Err(e) = self.servos.set_servo_angle(self.channels.tilt, state.angle_v) {
            log_servo_failure("tilt", &e);
        }
    }
}

fn log_servo_failure(axis: &str, e: &CarError) {
    warn!(axis, error = %e, "gimbal servo write failed");
}
