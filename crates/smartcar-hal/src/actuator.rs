//! `MotorActuator` trait for the drive motors and gimbal servos.
//!
//! The physical driver is not reentrant: callers must serialize every call.
//! In this workspace that is the job of the motion state machine in
//! `smartcar-kernel`, which is the only owner of a `MotorActuator`.

use smartcar_types::{CarError, DriveProfile};

/// Drive motors plus servo outputs of the motor controller board.
///
/// A timed move is expressed as `drive`, a wait owned by the caller, and a
/// `stop`. Keeping the wait outside the driver lets the owner cut a move
/// short without a second concurrent call into the driver.
pub trait MotorActuator: Send {
    /// Stable identifier for this driver, e.g. `"pca9685@0x40"`.
    fn id(&self) -> &str;

    /// Energise the wheels according to `profile` at `speed_percent` duty.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] if the controller cannot be
    /// reached.
    fn drive(&mut self, profile: DriveProfile, speed_percent: u8) -> Result<(), CarError>;

    /// De-energise all wheels.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] if the controller cannot be
    /// reached.
    fn stop(&mut self) -> Result<(), CarError>;

    /// Drive servo `channel` to `angle` degrees.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] if the channel cannot be
    /// written.
    fn set_servo_angle(&mut self, channel: u8, angle: u8) -> Result<(), CarError>;
}

impl<T: MotorActuator + ?Sized> MotorActuator for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn drive(&mut self, profile: DriveProfile, speed_percent: u8) -> Result<(), CarError> {
        (**self).drive(profile, speed_percent)
    }

    fn stop(&mut self) -> Result<(), CarError> {
        (**self).stop()
    }

    fn set_servo_angle(&mut self, channel: u8, angle: u8) -> Result<(), CarError> {
        (**self).set_servo_angle(channel, angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-process actuator used only for tests.
    struct CountingActuator {
        drives: usize,
        stops: usize,
        last_servo: Option<(u8, u8)>,
    }

    impl MotorActuator for CountingActuator {
        fn id(&self) -> &str {
            "counting"
        }

        fn drive(&mut self, _profile: DriveProfile, _speed_percent: u8) -> Result<(), CarError> {
            self.drives += 1;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CarError> {
            self.stops += 1;
            Ok(())
        }

        fn set_servo_angle(&mut self, channel: u8, angle: u8) -> Result<(), CarError> {
            self.last_servo = Some((channel, angle));
            Ok(())
        }
    }

    #[test]
    fn boxed_actuator_forwards_calls() {
        let mut act: Box<dyn MotorActuator> = Box::new(CountingActuator {
            drives: 0,
            stops: 0,
            last_servo: None,
        });
        assert_eq!(act.id(), "counting");
        act.drive(DriveProfile::Forward, 40).unwrap();
        act.stop().unwrap();
        act.set_servo_angle(9, 80).unwrap();
    }
}
