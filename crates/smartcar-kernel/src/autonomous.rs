//! [`AutonomousModeController`] – mode switching and the navigation session.
//!
//! A mode change is two-phase: [`AutonomousModeController::begin_toggle`]
//! (or [`begin_set`][AutonomousModeController::begin_set]) claims the
//! transition under a short lock, and [`ModeTransition::complete`] performs
//! the slow process start/terminate without holding it. While a transition
//! is in flight every other request is rejected, so two racing toggles can
//! never launch two navigation sessions.
//!
//! Lock order is session, then phase. [`AutonomousModeController::supervise`]
//! goes the other way and therefore only ever `try_lock`s the session.

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use smartcar_hal::NavigationProcess;
use smartcar_types::{CarError, Mode, RejectReason};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Manual,
    Starting,
    Autonomous,
    Stopping,
    /// Terminal. Entered by [`AutonomousModeController::shutdown`].
    Shutdown,
}

/// Owns the navigation process handle and the current [`Mode`].
pub struct AutonomousModeController {
    phase: Mutex<Phase>,
    session: Mutex<Box<dyn NavigationProcess>>,
    stop_grace: Duration,
}

impl AutonomousModeController {
    /// `stop_grace` bounds how long a terminating session may take before it
    /// is killed.
    pub fn new(session: impl NavigationProcess + 'static, stop_grace: Duration) -> Self {
        Self {
            phase: Mutex::new(Phase::Manual),
            session: Mutex::new(Box::new(session)),
            stop_grace,
        }
    }

    /// `Autonomous` only while a session is up and still running;
    /// transitional phases report `Manual`.
    pub fn mode(&self) -> Mode {
        self.supervise();
        match *self.phase() {
            Phase::Autonomous => Mode::Autonomous,
            _ => Mode::Manual,
        }
    }

    /// Drop back to manual if the navigation session exited on its own.
    ///
    /// Returns `true` only on the call that noticed the exit. A session busy
    /// in another thread is not inspected.
    pub fn supervise(&self) -> bool {
        let mut phase = self.phase();
        if *phase != Phase::Autonomous {
            return false;
        }
        let mut session = match self.session.try_lock() {
            Ok(session) => session,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if session.is_alive() {
            return false;
        }
        if let Err(e) = session.terminate(Duration::ZERO) {
            warn!(error = %e, "failed to reap exited navigation session");
        }
        *phase = Phase::Manual;
        error!("navigation session exited unexpectedly; back to manual mode");
        true
    }

    /// Claim a transition to the opposite mode.
    pub fn begin_toggle(&self) -> Result<ModeTransition<'_>, RejectReason> {
        self.supervise();
        let mut phase = self.phase();
        let enter = match *phase {
            Phase::Manual => true,
            Phase::Autonomous => false,
            Phase::Starting | Phase::Stopping => {
                return Err(RejectReason::TransitionInProgress);
            }
            Phase::Shutdown => return Err(RejectReason::ShuttingDown),
        };
        Ok(self.claim(&mut phase, enter))
    }

    /// Claim a transition into `enabled`'s mode.
    pub fn begin_set(&self, enabled: bool) -> Result<ModeTransition<'_>, RejectReason> {
        self.supervise();
        let mut phase = self.phase();
        match (*phase, enabled) {
            (Phase::Shutdown, _) => Err(RejectReason::ShuttingDown),
            (Phase::Starting | Phase::Stopping, _) => Err(RejectReason::TransitionInProgress),
            (Phase::Manual, false) => Err(RejectReason::AlreadyInMode(Mode::Manual)),
            (Phase::Autonomous, true) => Err(RejectReason::AlreadyInMode(Mode::Autonomous)),
            _ => Ok(self.claim(&mut phase, enabled)),
        }
    }

    /// Terminate any running session and refuse further transitions.
    ///
    /// A start already in flight is waited for and its session terminated
    /// here; one claimed but not yet started will not start at all.
    pub fn shutdown(&self) {
        *self.phase() = Phase::Shutdown;
        let mut session = self.session();
        if session.is_alive() {
            if let Err(e) = session.terminate(self.stop_grace) {
                warn!(error = %e, "navigation session did not stop cleanly");
            }
        }
    }

    fn claim(&self, phase: &mut Phase, enter: bool) -> ModeTransition<'_> {
        let (from, to) = if enter {
            (Phase::Manual, Phase::Starting)
        } else {
            (Phase::Autonomous, Phase::Stopping)
        };
        *phase = to;
        ModeTransition {
            controller: self,
            enter,
            revert_to: from,
            done: false,
        }
    }

    /// Move to `next` unless shutdown already took over.
    fn settle(&self, next: Phase) {
        let mut phase = self.phase();
        if *phase != Phase::Shutdown {
            *phase = next;
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, Box<dyn NavigationProcess>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-flight mode change. Dropping it without calling
/// [`complete`][ModeTransition::complete] abandons the change.
#[must_use = "the mode does not change until complete() is called"]
pub struct ModeTransition<'a> {
    controller: &'a AutonomousModeController,
    enter: bool,
    revert_to: Phase,
    done: bool,
}

impl ModeTransition<'_> {
    /// The mode this transition moves to.
    pub fn target(&self) -> Mode {
        if self.enter {
            Mode::Autonomous
        } else {
            Mode::Manual
        }
    }

    /// Start or stop the navigation session.
    ///
    /// Leaving autonomous mode always succeeds: a session that will not exit
    /// within the grace period is killed.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::Session`] when the session fails to start or the
    /// controller was shut down meanwhile; either way no session is left
    /// running.
    pub fn complete(mut self) -> Result<Mode, CarError> {
        let controller = self.controller;
        self.done = true;

        if !self.enter {
            if let Err(e) = controller.session().terminate(controller.stop_grace) {
                warn!(error = %e, "navigation session did not stop cleanly");
            }
            controller.settle(Phase::Manual);
            info!("autonomous mode deactivated");
            return Ok(Mode::Manual);
        }

        let mut session = controller.session();
        if *controller.phase() == Phase::Shutdown {
            return Err(shutting_down());
        }
        if let Err(e) = session.start() {
            controller.settle(Phase::Manual);
            error!(error = %e, "navigation session failed to start");
            return Err(match e {
                CarError::Session(_) => e,
                other => CarError::Session(other.to_string()),
            });
        }

        let mut phase = controller.phase();
        if *phase == Phase::Shutdown {
            if let Err(e) = session.terminate(controller.stop_grace) {
                warn!(error = %e, "navigation session did not stop cleanly");
            }
            warn!("navigation session started during shutdown; terminated");
            return Err(shutting_down());
        }
        *phase = Phase::Autonomous;
        info!("autonomous mode activated");
        Ok(Mode::Autonomous)
    }
}

fn shutting_down() -> CarError {
    CarError::Session("shutting down".into())
}

impl Drop for ModeTransition<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.controller.settle(self.revert_to);
        }
    }
}
