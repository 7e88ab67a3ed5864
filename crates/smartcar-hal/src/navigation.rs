//! `NavigationProcess` trait and the child-process implementation.
//!
//! The navigation stack (SLAM + planner) is an opaque external process. The
//! controller only needs to start it, stop it, and ask whether it is alive;
//! both transitions are idempotent.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use smartcar_types::CarError;
use tracing::{debug, info, warn};

/// Poll interval while waiting for a terminated process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lifecycle handle for the external navigation process.
pub trait NavigationProcess: Send {
    /// Start the process. Starting an already-running session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::Session`] when the process cannot be launched.
    fn start(&mut self) -> Result<(), CarError>;

    /// Ask the process to exit, waiting at most `grace` before killing it.
    /// Terminating a dead or never-started session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::Session`] when the process could not be reaped.
    fn terminate(&mut self, grace: Duration) -> Result<(), CarError>;

    /// Whether a session is currently running.
    fn is_alive(&mut self) -> bool;
}

impl<T: NavigationProcess + ?Sized> NavigationProcess for Box<T> {
    fn start(&mut self) -> Result<(), CarError> {
        (**self).start()
    }

    fn terminate(&mut self, grace: Duration) -> Result<(), CarError> {
        (**self).terminate(grace)
    }

    fn is_alive(&mut self) -> bool {
        (**self).is_alive()
    }
}

/// Runs the navigation stack as a child process, e.g.
/// `ros2 launch orb_slam3_ros mono.launch.py`.
pub struct ProcessNavigation {
    argv: Vec<String>,
    child: Option<Child>,
}

impl ProcessNavigation {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, child: None }
    }
}

impl NavigationProcess for ProcessNavigation {
    fn start(&mut self) -> Result<(), CarError> {
        if self.is_alive() {
            debug!("navigation session already running");
            return Ok(());
        }
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| CarError::Session("navigation command is empty".into()))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| CarError::Session(format!("failed to spawn {program}: {e}")))?;
        info!(pid = child.id(), program = %program, "navigation session started");
        self.child = Some(child);
        Ok(())
    }

    fn terminate(&mut self, grace: Duration) -> Result<(), CarError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(%status, "navigation session had already exited");
            return Ok(());
        }

        request_exit(&mut child);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(%status, "navigation session stopped");
                    return Ok(());
                }
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(e) => return Err(CarError::Session(e.to_string())),
            }
        }

        warn!(grace_ms = grace.as_millis() as u64, "navigation session ignored stop request; killing");
        if let Err(e) = child.kill() {
            debug!(error = %e, "kill failed, process probably exited");
        }
        child
            .wait()
            .map(|status| info!(%status, "navigation session killed"))
            .map_err(|e| CarError::Session(e.to_string()))
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) => {
                self.child = None;
                false
            }
            None => false,
        }
    }
}

impl Drop for ProcessNavigation {
    fn drop(&mut self) {
        if let Err(e) = self.terminate(Duration::from_secs(1)) {
            warn!(error = %e, "failed to stop navigation session on drop");
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        debug!(error = %e, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "kill delivery failed");
    }
}
