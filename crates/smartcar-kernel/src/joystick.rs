//! Deadband and composition rules for the drive joystick.
//!
//! | Condition | Result |
//! |---|---|
//! | `|x| > 0.5` and `|y| < 0.3` | strafe towards the sign of `x` |
//! | `|y| > 0.1` | forward/backward by the sign of `y`, veering when `|x| > 0.3` |
//! | otherwise | stop |
//!
//! Speed is always `|y| × speed_percent`, truncated. In the strafe branch
//! this means a nearly horizontal stick strafes slowly; that scaling is
//! kept exactly as the operator UI was tuned against it.

use smartcar_types::DriveProfile;

const STRAFE_MIN_X: f64 = 0.5;
const STRAFE_MAX_Y: f64 = 0.3;
const DRIVE_MIN_Y: f64 = 0.1;
const VEER_MIN_X: f64 = 0.3;

/// What a joystick vector asks the wheels to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickIntent {
    Drive {
        profile: DriveProfile,
        speed_percent: u8,
    },
    Stop,
}

/// Map a joystick vector onto a drive profile and speed.
///
/// Axes are clamped to `[-1, 1]`; callers reject non-finite input first.
pub fn resolve(x: f64, y: f64, speed_percent: u8) -> StickIntent {
    let x = x.clamp(-1.0, 1.0);
    let y = y.clamp(-1.0, 1.0);
    let speed = (y.abs() * f64::from(speed_percent)) as u8;

    let profile = if x.abs() > STRAFE_MIN_X && y.abs() < STRAFE_MAX_Y {
        if x > 0.0 {
            DriveProfile::StrafeRight
        } else {
            DriveProfile::StrafeLeft
        }
    } else if y.abs() > DRIVE_MIN_Y {
        match (y > 0.0, x) {
            (true, x) if x > VEER_MIN_X => DriveProfile::ForwardRight,
            (true, x) if x < -VEER_MIN_X => DriveProfile::ForwardLeft,
            (true, _) => DriveProfile::Forward,
            (false, x) if x > VEER_MIN_X => DriveProfile::BackwardRight,
            (false, x) if x < -VEER_MIN_X => DriveProfile::BackwardLeft,
            (false, _) => DriveProfile::Backward,
        }
    } else {
        return StickIntent::Stop;
    };

    StickIntent::Drive {
        profile,
        speed_percent: speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(profile: DriveProfile, speed_percent: u8) -> StickIntent {
        StickIntent::Drive {
            profile,
            speed_percent,
        }
    }

    #[test]
    fn straight_forward_scales_by_y() {
        assert_eq!(resolve(0.0, 0.8, 50), drive(DriveProfile::Forward, 40));
    }

    #[test]
    fn mostly_horizontal_stick_strafes_scaled_by_y() {
        assert_eq!(resolve(0.6, 0.1, 50), drive(DriveProfile::StrafeRight, 5));
        assert_eq!(resolve(-0.9, -0.2, 50), drive(DriveProfile::StrafeLeft, 10));
        // Pure horizontal deflection strafes at zero speed.
        assert_eq!(resolve(1.0, 0.0, 80), drive(DriveProfile::StrafeRight, 0));
    }

    #[test]
    fn diagonal_stick_veers() {
        assert_eq!(resolve(0.4, 0.5, 100), drive(DriveProfile::ForwardRight, 50));
        assert_eq!(resolve(-0.4, 0.5, 100), drive(DriveProfile::ForwardLeft, 50));
        assert_eq!(resolve(0.4, -0.5, 100), drive(DriveProfile::BackwardRight, 50));
        assert_eq!(resolve(-0.4, -0.5, 100), drive(DriveProfile::BackwardLeft, 50));
    }

    #[test]
    fn small_x_goes_straight_backward() {
        assert_eq!(resolve(0.2, -1.0, 60), drive(DriveProfile::Backward, 60));
    }

    #[test]
    fn centred_stick_stops() {
        assert_eq!(resolve(0.0, 0.0, 50), StickIntent::Stop);
        assert_eq!(resolve(0.4, 0.05, 50), StickIntent::Stop);
        assert_eq!(resolve(0.5, -0.1, 50), StickIntent::Stop);
    }

    #[test]
    fn out_of_range_axes_are_clamped() {
        assert_eq!(resolve(0.0, 3.0, 70), drive(DriveProfile::Forward, 70));
    }
}
