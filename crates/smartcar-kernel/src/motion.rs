//! [`MotionStateMachine`] – the only owner of the [`MotorActuator`].
//!
//! # States
//!
//! `Idle` → `Executing(plan, started_at)` → `Idle`. Entering `Executing`
//! requires the actuation lock; a timed move holds it for its whole duration
//! and always ends with a stop pulse followed by a short settle, so the
//! wheels never coast.
//!
//! # Preemption
//!
//! Every admitted command takes a ticket from a monotonically increasing
//! counter. The executing move sleeps on a condition variable and wakes as
//! soon as the counter moves past its ticket, issues its stop pulse, and
//! releases the lock. The newcomer only then reaches the actuator, so the
//! driver sees `Stop` before the next `Drive` and calls never interleave.
//! A command that was overtaken while still waiting for the lock never
//! reaches the actuator at all.
//!
//! Manual sources outrank the navigation stack: while any manual command is
//! admitted, autonomous commands are rejected instead of preempting it.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use smartcar_hal::MotorActuator;
use smartcar_types::{
    ActiveMotion, CarError, CommandSource, Mode, MotionPlan, Outcome, RejectReason, VehicleState,
    clamp_speed,
};
use tracing::{debug, info, warn};

/// Output channel for servo writes; lets the gimbal share the actuator
/// without owning it.
pub trait ServoBus: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] when the write fails.
    fn set_servo_angle(&self, channel: u8, angle: u8) -> Result<(), CarError>;
}

#[derive(Debug, Default)]
struct Slot {
    /// Ticket of the most recently admitted command.
    latest: u64,
    /// Manual commands admitted and not yet finished.
    manual_claims: usize,
}

/// Serializes all actuation and tracks [`VehicleState`].
pub struct MotionStateMachine {
    actuator: Mutex<Box<dyn MotorActuator>>,
    slot: Mutex<Slot>,
    wake: Condvar,
    vehicle: RwLock<VehicleState>,
    stop_settle: Duration,
}

/// An admitted command. Dropping it releases the manual claim.
struct Claim<'a> {
    machine: &'a MotionStateMachine,
    ticket: u64,
    manual: bool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.manual {
            let mut slot = lock(&self.machine.slot);
            slot.manual_claims = slot.manual_claims.saturating_sub(1);
        }
    }
}

impl MotionStateMachine {
    /// Take ownership of `actuator`. `stop_settle` is how long the stop pulse
    /// is held before the lock is released.
    pub fn new(actuator: impl MotorActuator + 'static, stop_settle: Duration) -> Self {
        Self {
            actuator: Mutex::new(Box::new(actuator)),
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
            vehicle: RwLock::new(VehicleState::default()),
            stop_settle,
        }
    }

    /// Start from a non-default speed.
    pub fn with_speed(self, percent: i64) -> Self {
        self.set_speed(percent);
        self
    }

    /// Consistent copy of the current vehicle state.
    pub fn vehicle_state(&self) -> VehicleState {
        self.vehicle.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn speed_percent(&self) -> u8 {
        self.vehicle.read().unwrap_or_else(PoisonError::into_inner).speed_percent
    }

    /// Store a new speed, clamped to `0..=100`. The active motion keeps the
    /// speed it started with.
    pub fn set_speed(&self, percent: i64) -> u8 {
        let speed = clamp_speed(percent);
        self.vehicle.write().unwrap_or_else(PoisonError::into_inner).speed_percent = speed;
        info!(requested = percent, speed_percent = speed, "speed changed");
        speed
    }

    pub fn record_mode(&self, mode: Mode) {
        self.vehicle.write().unwrap_or_else(PoisonError::into_inner).mode = mode;
    }

    /// Run `plan` to completion or until preempted.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] when the actuator fails; the
    /// machine is back in `Idle` by the time the error is returned.
    pub fn execute(&self, plan: MotionPlan, source: CommandSource) -> Result<Outcome, CarError> {
        let Some(claim) = self.admit(source) else {
            return Ok(Outcome::Rejected(RejectReason::ManualOverride));
        };
        let mut actuator = lock(&self.actuator);
        if self.overtaken(claim.ticket) {
            debug!(%source, ticket = claim.ticket, "motion superseded before start");
            return Ok(Outcome::Superseded);
        }

        self.begin(plan, source);
        let result = self.run(&mut actuator, claim.ticket, plan);
        self.finish();
        if let Err(e) = &result {
            warn!(%source, error = %e, "motion aborted");
        }
        result
    }

    /// Preempt whatever is running and issue a stop pulse.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] when the actuator fails.
    pub fn stop(&self, source: CommandSource) -> Result<Outcome, CarError> {
        let Some(claim) = self.admit(source) else {
            return Ok(Outcome::Rejected(RejectReason::ManualOverride));
        };
        let mut actuator = lock(&self.actuator);
        if self.overtaken(claim.ticket) {
            return Ok(Outcome::Superseded);
        }
        self.stop_pulse(&mut actuator)?;
        Ok(Outcome::Completed)
    }

    /// Preempt any motion, then run `f` while holding the actuation lock so
    /// that nothing moves until it returns. Counts as manual input.
    pub fn quiesce<R>(&self, f: impl FnOnce() -> R) -> R {
        let _claim = self.admit(CommandSource::Api);
        let _actuator = lock(&self.actuator);
        f()
    }

    fn admit(&self, source: CommandSource) -> Option<Claim<'_>> {
        let manual = source.is_manual();
        let mut slot = lock(&self.slot);
        if !manual && slot.manual_claims > 0 {
            debug!(%source, "autonomous command suspended by manual control");
            return None;
        }
        slot.latest += 1;
        if manual {
            slot.manual_claims += 1;
        }
        self.wake.notify_all();
        Some(Claim {
            machine: self,
            ticket: slot.latest,
            manual,
        })
    }

    fn overtaken(&self, ticket: u64) -> bool {
        lock(&self.slot).latest != ticket
    }

    fn begin(&self, plan: MotionPlan, source: CommandSource) {
        debug!(profile = %plan.profile, speed_percent = plan.speed_percent, duration_ms = plan.duration.as_millis() as u64, %source, "executing");
        self.vehicle.write().unwrap_or_else(PoisonError::into_inner).active_motion =
            Some(ActiveMotion {
                plan,
                source,
                started_at: Utc::now(),
            });
    }

    fn finish(&self) {
        self.vehicle.write().unwrap_or_else(PoisonError::into_inner).active_motion = None;
    }

    fn run(
        &self,
        actuator: &mut Box<dyn MotorActuator>,
        ticket: u64,
        plan: MotionPlan,
    ) -> Result<Outcome, CarError> {
        if let Err(e) = actuator.drive(plan.profile, plan.speed_percent) {
            // Best effort: the wheels may have been partially energised.
            if let Err(stop_err) = actuator.stop() {
                warn!(error = %stop_err, "stop after failed drive also failed");
            }
            return Err(e);
        }

        let slot = lock(&self.slot);
        let (slot, _) = self
            .wake
            .wait_timeout_while(slot, plan.duration, |s| s.latest == ticket)
            .unwrap_or_else(PoisonError::into_inner);
        let interrupted = slot.latest != ticket;
        drop(slot);

        self.stop_pulse(actuator)?;
        Ok(if interrupted {
            Outcome::Interrupted
        } else {
            Outcome::Completed
        })
    }

    fn stop_pulse(&self, actuator: &mut Box<dyn MotorActuator>) -> Result<(), CarError> {
        actuator.stop()?;
        if !self.stop_settle.is_zero() {
            std::thread::sleep(self.stop_settle);
        }
        Ok(())
    }
}

impl ServoBus for MotionStateMachine {
    fn set_servo_angle(&self, channel: u8, angle: u8) -> Result<(), CarError> {
        lock(&self.actuator).set_servo_angle(channel, angle)
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartcar_hal::{ActuatorCall, SimMotor};
    use smartcar_types::DriveProfile;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn plan(profile: DriveProfile, ms: u64) -> MotionPlan {
        MotionPlan {
            profile,
            speed_percent: 40,
            duration: Duration::from_millis(ms),
        }
    }

    fn machine() -> (Arc<MotionStateMachine>, smartcar_hal::ActuatorLog) {
        let motor = SimMotor::new("sim");
        let log = motor.log();
        (Arc::new(MotionStateMachine::new(motor, Duration::ZERO)), log)
    }

    fn wait_for_motion(machine: &MotionStateMachine) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while machine.vehicle_state().active_motion.is_none() {
            assert!(Instant::now() < deadline, "motion never started");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn timed_move_ends_with_stop_pulse() {
        let (machine, log) = machine();
        let outcome = machine
            .execute(plan(DriveProfile::Forward, 10), CommandSource::Joystick)
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(
            log.calls(),
            vec![
                ActuatorCall::Drive { profile: DriveProfile::Forward, speed_percent: 40 },
                ActuatorCall::Stop,
            ]
        );
        assert!(machine.vehicle_state().active_motion.is_none());
    }

    #[test]
    fn manual_command_preempts_running_move_with_stop_first() {
        let (machine, log) = machine();
        let long = {
            let machine = Arc::clone(&machine);
            thread::spawn(move || {
                machine.execute(plan(DriveProfile::Forward, 5_000), CommandSource::Autonomous)
            })
        };
        wait_for_motion(&machine);

        let started = Instant::now();
        let outcome = machine
            .execute(plan(DriveProfile::TurnLeft, 10), CommandSource::Joystick)
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(long.join().unwrap().unwrap(), Outcome::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(
            log.calls(),
            vec![
                ActuatorCall::Drive { profile: DriveProfile::Forward, speed_percent: 40 },
                ActuatorCall::Stop,
                ActuatorCall::Drive { profile: DriveProfile::TurnLeft, speed_percent: 40 },
                ActuatorCall::Stop,
            ]
        );
        assert_eq!(log.overlaps(), 0);
    }

    #[test]
    fn autonomous_command_is_rejected_during_manual_motion() {
        let (machine, log) = machine();
        let manual = {
            let machine = Arc::clone(&machine);
            thread::spawn(move || {
                machine.execute(plan(DriveProfile::Forward, 300), CommandSource::Voice)
            })
        };
        wait_for_motion(&machine);

        let outcome = machine
            .execute(plan(DriveProfile::Backward, 10), CommandSource::Autonomous)
            .unwrap();
        assert_eq!(outcome, Outcome::Rejected(RejectReason::ManualOverride));
        assert_eq!(manual.join().unwrap().unwrap(), Outcome::Completed);

        // Once the manual move is over the navigation stack may drive again.
        let outcome = machine
            .execute(plan(DriveProfile::Backward, 10), CommandSource::Autonomous)
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(log.calls().len(), 4);
    }

    #[test]
    fn drive_failure_returns_to_idle_and_surfaces_error() {
        let motor = SimMotor::new("sim");
        let log = motor.log();
        motor.faults().fail_drive(true);
        let machine = MotionStateMachine::new(motor, Duration::ZERO);

        let result = machine.execute(plan(DriveProfile::Forward, 1_000), CommandSource::Joystick);
        assert!(matches!(result, Err(CarError::HardwareUnavailable { .. })));
        assert!(machine.vehicle_state().active_motion.is_none());
        assert_eq!(log.calls().last(), Some(&ActuatorCall::Stop));
    }

    #[test]
    fn set_speed_clamps_and_keeps_active_motion() {
        let (machine, _log) = machine();
        assert_eq!(machine.set_speed(250), 100);
        assert_eq!(machine.set_speed(-4), 0);
        assert_eq!(machine.set_speed(65), 65);
        assert_eq!(machine.speed_percent(), 65);
    }

    #[test]
    fn stop_interrupts_running_move() {
        let (machine, log) = machine();
        let mover = {
            let machine = Arc::clone(&machine);
            thread::spawn(move || {
                machine.execute(plan(DriveProfile::StrafeLeft, 5_000), CommandSource::Joystick)
            })
        };
        wait_for_motion(&machine);

        assert_eq!(machine.stop(CommandSource::Voice).unwrap(), Outcome::Completed);
        assert_eq!(mover.join().unwrap().unwrap(), Outcome::Interrupted);
        assert_eq!(
            log.calls(),
            vec![
                ActuatorCall::Drive { profile: DriveProfile::StrafeLeft, speed_percent: 40 },
                ActuatorCall::Stop,
                ActuatorCall::Stop,
            ]
        );
    }

    #[test]
    fn servo_writes_wait_for_the_actuation_lock() {
        let motor = SimMotor::new("sim").with_latency(Duration::from_millis(5));
        let log = motor.log();
        let machine = Arc::new(MotionStateMachine::new(motor, Duration::ZERO));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let machine = Arc::clone(&machine);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        machine.set_servo_angle(9, 80).map(|_| Outcome::Completed)
                    } else {
                        machine.execute(plan(DriveProfile::Forward, 5), CommandSource::Joystick)
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(log.overlaps(), 0);
    }

    #[test]
    fn quiesce_runs_closure_with_motion_halted() {
        let (machine, log) = machine();
        let mover = {
            let machine = Arc::clone(&machine);
            thread::spawn(move || {
                machine.execute(plan(DriveProfile::Forward, 5_000), CommandSource::Joystick)
            })
        };
        wait_for_motion(&machine);

        let calls_seen = machine.quiesce(|| log.calls());
        assert_eq!(calls_seen.last(), Some(&ActuatorCall::Stop));
        assert_eq!(mover.join().unwrap().unwrap(), Outcome::Interrupted);
    }
}
