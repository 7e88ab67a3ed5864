//! `smartcar-hal` – Hardware Abstraction Layer
//!
//! Capability traits for everything the control core touches but does not
//! implement itself, plus the drivers that back them.
//!
//! # Modules
//!
//! - [`actuator`] – [`MotorActuator`]: the four drive motors and the two
//!   gimbal servos behind one non-reentrant driver.
//! - [`camera`] – [`Camera`]: single-reader frame source, including
//!   [`MjpegProcessCamera`][camera::MjpegProcessCamera] which splits the
//!   MJPEG stream of a capture process into frames.
//! - [`navigation`] – [`NavigationProcess`]: lifecycle of the external
//!   navigation stack, with [`ProcessNavigation`][navigation::ProcessNavigation]
//!   giving bounded, escalating termination.
//! - [`sim`] – recording drivers for tests and headless runs.
//! - `pca9685` (feature `pca9685`) – the motor HAT driver.

pub mod actuator;
pub mod camera;
pub mod navigation;
#[cfg(feature = "pca9685")]
pub mod pca9685;
pub mod sim;

pub use actuator::MotorActuator;
pub use camera::{Camera, CameraFrame, MjpegProcessCamera};
pub use navigation::{NavigationProcess, ProcessNavigation};
pub use sim::{
    ActuatorCall, ActuatorLog, SIM_FRAME_SIZE, SimCamera, SimMotor, SimMotorFaults, SimNavigation,
    SimNavigationProbe,
};
