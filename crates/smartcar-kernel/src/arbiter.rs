//! [`CommandArbiter`] – the single entry point for every normalized
//! [`Command`].
//!
//! The arbiter keeps no queue. Each call is resolved immediately against the
//! current vehicle, gimbal, and mode state:
//!
//! - manual motion preempts whatever is running, autonomous motion included;
//! - motion from the navigation stack is rejected outside autonomous mode,
//!   and suspended while a manual command holds the wheels;
//! - mode changes run with the wheels stopped and the actuation lock held,
//!   so they never overlap a manual move.

use std::sync::Arc;
use std::time::Duration;

use smartcar_types::{
    CarError, Command, CommandSource, GimbalState, Mode, MotionPlan, Outcome, RejectReason,
    SpeakOutcome,
};
use tracing::{debug, info, instrument, warn};

use crate::autonomous::{AutonomousModeController, ModeTransition};
use crate::gimbal::GimbalController;
use crate::joystick::{self, StickIntent};
use crate::motion::MotionStateMachine;

/// Where spoken feedback goes. Implemented by the speech scheduler.
pub trait SpeechSink: Send + Sync {
    fn speak(&self, text: &str, lang: &str) -> SpeakOutcome;
}

/// Tunable durations used when turning commands into motion plans.
#[derive(Debug, Clone, Copy)]
pub struct ArbiterTiming {
    /// How long a single joystick sample drives before the stop pulse.
    pub joystick_pulse: Duration,
}

impl Default for ArbiterTiming {
    fn default() -> Self {
        Self {
            joystick_pulse: Duration::from_millis(100),
        }
    }
}

/// Point-in-time view of what the overlay shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub speed_percent: u8,
    pub gimbal: GimbalState,
    pub mode: Mode,
}

/// Read side of the control state, for consumers that must not mutate it.
pub trait StatusSource: Send + Sync {
    fn snapshot(&self) -> StatusSnapshot;
}

pub struct CommandArbiter {
    motion: Arc<MotionStateMachine>,
    gimbal: GimbalController,
    autonomy: AutonomousModeController,
    speech: Arc<dyn SpeechSink>,
    timing: ArbiterTiming,
}

impl CommandArbiter {
    pub fn new(
        motion: Arc<MotionStateMachine>,
        gimbal: GimbalController,
        autonomy: AutonomousModeController,
        speech: Arc<dyn SpeechSink>,
        timing: ArbiterTiming,
    ) -> Self {
        Self {
            motion,
            gimbal,
            autonomy,
            speech,
            timing,
        }
    }

    pub fn motion(&self) -> &MotionStateMachine {
        &self.motion
    }

    pub fn gimbal(&self) -> &GimbalController {
        &self.gimbal
    }

    /// Current mode. A navigation session that died on its own is noticed
    /// here and the vehicle state is put back to manual.
    pub fn mode(&self) -> Mode {
        if self.autonomy.supervise() {
            self.motion.record_mode(Mode::Manual);
        }
        self.autonomy.mode()
    }

    /// Resolve one command.
    ///
    /// Malformed input (non-finite axes, empty speech) yields
    /// [`Outcome::Ignored`]; policy refusals yield [`Outcome::Rejected`].
    ///
    /// # Errors
    ///
    /// Actuator failures ([`CarError::HardwareUnavailable`]) and navigation
    /// start failures ([`CarError::Session`]) are returned after the state
    /// has been restored to `Idle`/`Manual`.
    #[instrument(skip_all, fields(%source, ?command))]
    pub fn submit(&self, source: CommandSource, command: Command) -> Result<Outcome, CarError> {
        if source == CommandSource::Autonomous
            && is_motion(&command)
            && self.mode() != Mode::Autonomous
        {
            debug!("navigation intent outside autonomous mode");
            return Ok(Outcome::Rejected(RejectReason::NotAutonomous));
        }

        match command {
            Command::Move { vx, vy } => {
                if !(vx.is_finite() && vy.is_finite()) {
                    return Ok(Outcome::Ignored);
                }
                match joystick::resolve(vx, vy, self.motion.speed_percent()) {
                    StickIntent::Drive {
                        profile,
                        speed_percent,
                    } => self.motion.execute(
                        MotionPlan {
                            profile,
                            speed_percent,
                            duration: self.timing.joystick_pulse,
                        },
                        source,
                    ),
                    StickIntent::Stop => self.motion.stop(source),
                }
            }
            Command::Maneuver {
                profile,
                duration_ms,
            } => self.motion.execute(
                MotionPlan {
                    profile,
                    speed_percent: self.motion.speed_percent(),
                    duration: Duration::from_millis(duration_ms),
                },
                source,
            ),
            Command::Stop => self.motion.stop(source),
            Command::SetSpeed { percent } => Ok(Outcome::SpeedSet(self.motion.set_speed(percent))),
            Command::ToggleAutonomous => match self.autonomy.begin_toggle() {
                Ok(transition) => self.change_mode(transition),
                Err(reason) => Ok(Outcome::Rejected(reason)),
            },
            Command::SetAutonomous { enabled } => match self.autonomy.begin_set(enabled) {
                Ok(transition) => self.change_mode(transition),
                Err(reason) => Ok(Outcome::Rejected(reason)),
            },
            Command::GimbalAdjust { dx, dy } => {
                if !(dx.is_finite() && dy.is_finite()) {
                    return Ok(Outcome::Ignored);
                }
                Ok(Outcome::GimbalMoved(self.gimbal.adjust(dx, dy)))
            }
            Command::Speak { text, lang } => {
                if text.trim().is_empty() {
                    return Ok(Outcome::Ignored);
                }
                Ok(Outcome::Speech(self.speech.speak(&text, &lang)))
            }
        }
    }

    /// Stop the navigation session and the wheels. Called once on shutdown,
    /// after the camera has been released.
    pub fn shutdown(&self) {
        self.autonomy.shutdown();
        self.motion.record_mode(Mode::Manual);
        if let Err(e) = self.motion.stop(CommandSource::Api) {
            warn!(error = %e, "final stop failed");
        }
        info!("control core shut down");
    }

    fn change_mode(&self, transition: ModeTransition<'_>) -> Result<Outcome, CarError> {
        let target = transition.target();
        let result = self.motion.quiesce(|| transition.complete());
        match result {
            Ok(mode) => {
                self.motion.record_mode(mode);
                Ok(Outcome::ModeChanged(mode))
            }
            Err(e) => {
                self.motion.record_mode(Mode::Manual);
                warn!(%target, error = %e, "mode change failed");
                Err(e)
            }
        }
    }
}

impl StatusSource for CommandArbiter {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            speed_percent: self.motion.speed_percent(),
            gimbal: self.gimbal.state(),
            mode: self.mode(),
        }
    }
}

fn is_motion(command: &Command) -> bool {
    matches!(
        command,
        Command::Move { .. } | Command::Maneuver { .. } | Command::Stop | Command::SetSpeed { .. }
    )
}
