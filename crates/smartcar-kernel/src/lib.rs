//! `smartcar-kernel` – Command arbitration & motion control
//!
//! The control core of the vehicle. Every input source funnels through here,
//! and this is the only crate that ever touches the motor driver.
//!
//! # Modules
//!
//! - [`arbiter`] – [`CommandArbiter`][arbiter::CommandArbiter]: resolves each
//!   normalized [`Command`][smartcar_types::Command] immediately under the
//!   manual-over-autonomous priority policy.
//! - [`motion`] – [`MotionStateMachine`][motion::MotionStateMachine]:
//!   owns the [`MotorActuator`][smartcar_hal::MotorActuator], serializes
//!   actuation, and preempts running moves with a stop pulse.
//! - [`gimbal`] – [`GimbalController`][gimbal::GimbalController]: clamped
//!   pan/tilt updates written as two independent servo calls.
//! - [`autonomous`] – [`AutonomousModeController`][autonomous::AutonomousModeController]:
//!   Manual/Autonomous switching and the navigation session lifecycle.
//! - [`joystick`] – deadband and composition rules for the drive stick.

pub mod arbiter;
pub mod autonomous;
pub mod gimbal;
pub mod joystick;
pub mod motion;

pub use arbiter::{ArbiterTiming, CommandArbiter, SpeechSink, StatusSnapshot, StatusSource};
pub use autonomous::{AutonomousModeController, ModeTransition};
pub use gimbal::{GimbalChannels, GimbalController};
pub use motion::{MotionStateMachine, ServoBus};
