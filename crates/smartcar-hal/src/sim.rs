//! In-process simulated drivers for tests and headless runs.
//!
//! Every driver records what it was asked to do through a cloneable probe,
//! so tests can hand the driver to the control core and still assert on the
//! exact call sequence afterwards.
//!
//! # Example
//!
//! ```rust
//! use smartcar_hal::sim::{ActuatorCall, SimMotor};
//! use smartcar_hal::MotorActuator;
//! use smartcar_types::DriveProfile;
//!
//! let mut motor = SimMotor::new("sim");
//! let log = motor.log();
//! motor.drive(DriveProfile::Forward, 40).unwrap();
//! motor.stop().unwrap();
//! assert_eq!(
//!     log.calls(),
//!     vec![
//!         ActuatorCall::Drive { profile: DriveProfile::Forward, speed_percent: 40 },
//!         ActuatorCall::Stop,
//!     ]
//! );
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use smartcar_types::{CarError, DriveProfile};

use crate::actuator::MotorActuator;
use crate::camera::{Camera, CameraFrame};
use crate::navigation::NavigationProcess;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Motor
// ────────────────────────────────────────────────────────────────────────────

/// One call received by a [`SimMotor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    Drive {
        profile: DriveProfile,
        speed_percent: u8,
    },
    Stop,
    Servo {
        channel: u8,
        angle: u8,
    },
}

/// Shared, ordered record of the calls a [`SimMotor`] received.
#[derive(Debug, Clone, Default)]
pub struct ActuatorLog {
    calls: Arc<Mutex<Vec<ActuatorCall>>>,
    overlaps: Arc<AtomicUsize>,
}

impl ActuatorLog {
    /// Snapshot of every call so far, in arrival order.
    pub fn calls(&self) -> Vec<ActuatorCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Number of calls that started while another call was still running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn push(&self, call: ActuatorCall) {
        lock(&self.calls).push(call);
    }
}

#[derive(Debug, Default)]
struct MotorFaults {
    drive: bool,
    servo_channels: Vec<u8>,
}

/// Fault injection handle for a [`SimMotor`].
#[derive(Debug, Clone, Default)]
pub struct SimMotorFaults(Arc<Mutex<MotorFaults>>);

impl SimMotorFaults {
    /// Make every subsequent `drive` call fail (or succeed again).
    pub fn fail_drive(&self, fail: bool) {
        lock(&self.0).drive = fail;
    }

    /// Make writes to servo `channel` fail.
    pub fn fail_servo(&self, channel: u8) {
        lock(&self.0).servo_channels.push(channel);
    }
}

/// A simulated motor controller that records every call.
///
/// Failed calls are recorded too, so tests can see what was attempted.
pub struct SimMotor {
    id: String,
    log: ActuatorLog,
    faults: SimMotorFaults,
    busy: Arc<AtomicBool>,
    latency: Duration,
}

impl SimMotor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            log: ActuatorLog::default(),
            faults: SimMotorFaults::default(),
            busy: Arc::new(AtomicBool::new(false)),
            latency: Duration::ZERO,
        }
    }

    /// Make every call take `latency`, which widens the window in which an
    /// unserialized caller would be caught overlapping.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn log(&self) -> ActuatorLog {
        self.log.clone()
    }

    pub fn faults(&self) -> SimMotorFaults {
        self.faults.clone()
    }

    fn record(&self, call: ActuatorCall) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.log.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.log.push(call);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl MotorActuator for SimMotor {
    fn id(&self) -> &str {
        &self.id
    }

    fn drive(&mut self, profile: DriveProfile, speed_percent: u8) -> Result<(), CarError> {
        self.record(ActuatorCall::Drive {
            profile,
            speed_percent,
        });
        if lock(&self.faults.0).drive {
            return Err(CarError::hardware(&self.id, "simulated drive fault"));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CarError> {
        self.record(ActuatorCall::Stop);
        Ok(())
    }

    fn set_servo_angle(&mut self, channel: u8, angle: u8) -> Result<(), CarError> {
        self.record(ActuatorCall::Servo { channel, angle });
        if lock(&self.faults.0).servo_channels.contains(&channel) {
            return Err(CarError::hardware(
                &self.id,
                format!("simulated fault on servo channel {channel}"),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

/// Size of the simulated camera's frames.
pub const SIM_FRAME_SIZE: (u32, u32) = (320, 240);

/// A simulated camera producing a flat dark-grey JPEG test card.
pub struct SimCamera {
    id: String,
    produced: Arc<AtomicUsize>,
    limit: Option<usize>,
    released: bool,
    card: Option<Vec<u8>>,
}

impl SimCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            produced: Arc::new(AtomicUsize::new(0)),
            limit: None,
            released: false,
            card: None,
        }
    }

    /// Fail every capture after `limit` frames, as an unplugged camera would.
    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Counter of frames handed out so far.
    pub fn produced(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.produced)
    }

    fn card(&mut self) -> Result<Vec<u8>, CarError> {
        if let Some(card) = &self.card {
            return Ok(card.clone());
        }
        let (width, height) = SIM_FRAME_SIZE;
        let image = RgbImage::from_pixel(width, height, Rgb([40, 40, 40]));
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&image)
            .map_err(|e| CarError::hardware(&self.id, format!("test card encoding failed: {e}")))?;
        self.card = Some(jpeg.clone());
        Ok(jpeg)
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, CarError> {
        if self.released {
            return Err(CarError::hardware(&self.id, "camera released"));
        }
        let n = self.produced.load(Ordering::SeqCst);
        if self.limit.is_some_and(|limit| n >= limit) {
            return Err(CarError::hardware(&self.id, "simulated read failure"));
        }
        let data = self.card()?;
        self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(CameraFrame {
            width: SIM_FRAME_SIZE.0,
            height: SIM_FRAME_SIZE.1,
            data,
        })
    }

    fn release(&mut self) {
        self.released = true;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Navigation
// ────────────────────────────────────────────────────────────────────────────

/// Counters shared between a [`SimNavigation`] and the test observing it.
#[derive(Debug, Clone, Default)]
pub struct SimNavigationProbe {
    starts: Arc<AtomicUsize>,
    terminates: Arc<AtomicUsize>,
    alive: Arc<AtomicBool>,
}

impl SimNavigationProbe {
    /// Number of `start` calls received.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `terminate` calls received.
    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Make the running session exit on its own, as a crashed node would.
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// A simulated navigation stack with an optional slow start.
#[derive(Default)]
pub struct SimNavigation {
    probe: SimNavigationProbe,
    start_delay: Duration,
    fail_start: bool,
}

impl SimNavigation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` block for `delay`, like a launch file bringing up nodes.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Make every `start` call fail.
    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn probe(&self) -> SimNavigationProbe {
        self.probe.clone()
    }
}

impl NavigationProcess for SimNavigation {
    fn start(&mut self) -> Result<(), CarError> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        if !self.start_delay.is_zero() {
            thread::sleep(self.start_delay);
        }
        if self.fail_start {
            return Err(CarError::Session("simulated launch failure".into()));
        }
        self.probe.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&mut self, _grace: Duration) -> Result<(), CarError> {
        self.probe.terminates.fetch_add(1, Ordering::SeqCst);
        self.probe.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.probe.is_alive()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::read_jpeg;
    use std::io::Cursor;

    #[test]
    fn sim_motor_records_calls_in_order() {
        let mut motor = SimMotor::new("sim");
        let log = motor.log();
        motor.set_servo_angle(9, 80).unwrap();
        motor.drive(DriveProfile::TurnLeft, 30).unwrap();
        motor.stop().unwrap();
        assert_eq!(
            log.calls(),
            vec![
                ActuatorCall::Servo { channel: 9, angle: 80 },
                ActuatorCall::Drive { profile: DriveProfile::TurnLeft, speed_percent: 30 },
                ActuatorCall::Stop,
            ]
        );
        assert_eq!(log.overlaps(), 0);
    }

    #[test]
    fn sim_motor_fault_injection() {
        let mut motor = SimMotor::new("sim");
        let faults = motor.faults();
        faults.fail_servo(10);
        faults.fail_drive(true);

        assert!(motor.set_servo_angle(9, 80).is_ok());
        assert!(matches!(
            motor.set_servo_angle(10, 40),
            Err(CarError::HardwareUnavailable { .. })
        ));
        assert!(motor.drive(DriveProfile::Forward, 10).is_err());

        faults.fail_drive(false);
        assert!(motor.drive(DriveProfile::Forward, 10).is_ok());
        // Attempts are logged even when they fail.
        assert_eq!(motor.log().calls().len(), 4);
    }

    #[test]
    fn sim_camera_frames_are_valid_jpeg_framing() {
        let mut cam = SimCamera::new("front");
        let frame = cam.capture().unwrap();
        let parsed = read_jpeg(&mut Cursor::new(frame.data.clone())).unwrap();
        assert_eq!(parsed, Some(frame.data.clone()));

        let decoded = image::load_from_memory_with_format(&frame.data, image::ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded.dimensions(), SIM_FRAME_SIZE);
        assert_eq!((frame.width, frame.height), SIM_FRAME_SIZE);
    }

    #[test]
    fn sim_camera_fails_after_limit_and_after_release() {
        let mut cam = SimCamera::new("front").with_frame_limit(2);
        assert!(cam.capture().is_ok());
        assert!(cam.capture().is_ok());
        assert!(cam.capture().is_err());

        let mut cam = SimCamera::new("front");
        cam.release();
        assert!(cam.capture().is_err());
    }

    #[test]
    fn sim_navigation_counts_lifecycle_calls() {
        let mut nav = SimNavigation::new();
        let probe = nav.probe();
        nav.start().unwrap();
        assert!(probe.is_alive());
        nav.terminate(Duration::from_millis(1)).unwrap();
        assert!(!probe.is_alive());
        assert_eq!(probe.starts(), 1);
        assert_eq!(probe.terminates(), 1);
    }

    #[test]
    fn failing_sim_navigation_never_comes_alive() {
        let mut nav = SimNavigation::new().failing();
        assert!(nav.start().is_err());
        assert!(!nav.is_alive());
    }
}
