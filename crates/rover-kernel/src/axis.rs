//! [`AxisMachine`] – discrete state machine for a single axis.
//!
//! The machine decides *whether* a command needs a hardware call; it never
//! issues one itself. Callers apply the resulting
//! [`ActuatorCall`][rover_types::ActuatorCall] while still holding the axis
//! slot, which keeps calls on one channel strictly ordered.
//!
//! The `locked` overlay is a shared flag rather than machine state, so the
//! interlock can lock an axis without waiting for its slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rover_types::{Axis, AxisSnapshot, AxisState, Direction, RoverError};

/// Result of feeding a command to an [`AxisMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed; exactly one hardware call must be issued.
    Actuate,
    /// Nothing to do in hardware.
    Unchanged,
}

impl Transition {
    pub fn actuates(self) -> bool {
        self == Transition::Actuate
    }
}

/// State machine for one axis.
///
/// Motion axes move between `idle`, `moving_positive` and
/// `moving_negative`. On/off outputs move between `idle` and `on`. The
/// shoulder additionally carries a `locked` overlay set by the low-voltage
/// interlock, under which positive motion is refused.
#[derive(Debug, Clone)]
pub struct AxisMachine {
    axis: Axis,
    state: AxisState,
    locked: Arc<AtomicBool>,
    last_command_at: Option<DateTime<Utc>>,
}

impl AxisMachine {
    pub fn new(axis: Axis) -> Self {
        Self::with_lock(axis, Arc::new(AtomicBool::new(false)))
    }

    /// A machine whose `locked` overlay follows `lock`.
    pub fn with_lock(axis: Axis, lock: Arc<AtomicBool>) -> Self {
        Self {
            axis,
            state: AxisState::Idle,
            locked: lock,
            last_command_at: None,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn state(&self) -> AxisState {
        self.state
    }

    pub fn locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn last_command_at(&self) -> Option<DateTime<Utc>> {
        self.last_command_at
    }

    /// Request motion in `direction`.
    ///
    /// Repeating the current motion is idempotent: no hardware call, but the
    /// last-command timestamp still advances.
    ///
    /// # Errors
    ///
    /// [`RoverError::InterlockBlocked`] for positive motion while locked.
    /// The state and timestamp are left untouched.
    pub fn request_move(
        &mut self,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Result<Transition, RoverError> {
        if direction == Direction::Positive && self.locked() {
            return Err(RoverError::InterlockBlocked { axis: self.axis });
        }
        self.last_command_at = Some(now);
        let target = AxisState::moving(direction);
        if self.state == target {
            return Ok(Transition::Unchanged);
        }
        self.state = target;
        Ok(Transition::Actuate)
    }

    /// Request a stop. Stopping an idle axis is a no-op.
    pub fn request_stop(&mut self, now: DateTime<Utc>) -> Transition {
        self.last_command_at = Some(now);
        if self.state == AxisState::Idle {
            return Transition::Unchanged;
        }
        self.state = AxisState::Idle;
        Transition::Actuate
    }

    /// Switch an on/off axis (the headlight or a GPIO switch).
    pub fn request_switch(&mut self, on: bool, now: DateTime<Utc>) -> Transition {
        self.last_command_at = Some(now);
        let target = if on { AxisState::On } else { AxisState::Idle };
        if self.state == target {
            return Transition::Unchanged;
        }
        self.state = target;
        Transition::Actuate
    }

    /// Set or clear the `locked` overlay. Does not change the motion state.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    /// Drop to `idle` without deciding on a hardware call. Used after a
    /// hardware fault and when an absolute move supersedes motion.
    pub fn force_idle(&mut self, now: DateTime<Utc>) {
        self.state = AxisState::Idle;
        self.last_command_at = Some(now);
    }

    pub fn snapshot(&self) -> AxisSnapshot {
        AxisSnapshot {
            axis: self.axis,
            state: self.state,
            label: self.state.label(self.axis).to_string(),
            locked: self.locked(),
            last_command_at: self.last_command_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    #[test]
    fn move_from_idle_actuates() {
        let mut m = AxisMachine::new(Axis::Drive);
        assert_eq!(
            m.request_move(Direction::Positive, t(1)).unwrap(),
            Transition::Actuate
        );
        assert_eq!(m.state(), AxisState::MovingPositive);
    }

    #[test]
    fn repeated_move_is_idempotent_but_advances_timestamp() {
        let mut m = AxisMachine::new(Axis::Drive);
        m.request_move(Direction::Positive, t(1)).unwrap();
        assert_eq!(
            m.request_move(Direction::Positive, t(2)).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(m.last_command_at(), Some(t(2)));
    }

    #[test]
    fn reversal_goes_straight_to_opposite_motion() {
        let mut m = AxisMachine::new(Axis::Yaw);
        m.request_move(Direction::Positive, t(1)).unwrap();
        assert!(m.request_move(Direction::Negative, t(2)).unwrap().actuates());
        assert_eq!(m.state(), AxisState::MovingNegative);
    }

    #[test]
    fn stop_while_idle_is_noop() {
        let mut m = AxisMachine::new(Axis::Wrist);
        assert_eq!(m.request_stop(t(1)), Transition::Unchanged);
        m.request_move(Direction::Negative, t(2)).unwrap();
        assert_eq!(m.request_stop(t(3)), Transition::Actuate);
        assert_eq!(m.state(), AxisState::Idle);
    }

    #[test]
    fn locked_rejects_positive_but_allows_lowering_and_stop() {
        let mut m = AxisMachine::new(Axis::Shoulder);
        m.set_locked(true);

        let err = m.request_move(Direction::Positive, t(1)).unwrap_err();
        assert_eq!(
            err,
            RoverError::InterlockBlocked {
                axis: Axis::Shoulder
            }
        );
        assert_eq!(m.state(), AxisState::Idle);
        assert_eq!(m.last_command_at(), None);

        assert!(m.request_move(Direction::Negative, t(2)).unwrap().actuates());
        assert!(m.request_stop(t(3)).actuates());
    }

    #[test]
    fn unlocking_restores_positive_motion() {
        let mut m = AxisMachine::new(Axis::Shoulder);
        m.set_locked(true);
        assert!(m.request_move(Direction::Positive, t(1)).is_err());
        m.set_locked(false);
        assert!(m.request_move(Direction::Positive, t(2)).unwrap().actuates());
    }

    #[test]
    fn shared_lock_is_seen_without_touching_the_machine() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut m = AxisMachine::with_lock(Axis::Shoulder, Arc::clone(&flag));
        flag.store(true, Ordering::Release);
        assert!(m.locked());
        assert!(m.snapshot().locked);
        assert!(m.request_move(Direction::Positive, t(1)).is_err());
        flag.store(false, Ordering::Release);
        assert!(m.request_move(Direction::Positive, t(2)).unwrap().actuates());
    }

    #[test]
    fn headlight_switches_between_idle_and_on() {
        let mut m = AxisMachine::new(Axis::Headlight);
        assert!(m.request_switch(true, t(1)).actuates());
        assert_eq!(m.state(), AxisState::On);
        assert!(!m.request_switch(true, t(2)).actuates());
        assert!(m.request_switch(false, t(3)).actuates());
        assert_eq!(m.snapshot().label, "idle");
    }

    #[test]
    fn snapshot_reports_joint_labels() {
        let mut m = AxisMachine::new(Axis::Gripper);
        m.request_move(Direction::Positive, t(1)).unwrap();
        let snap = m.snapshot();
        assert_eq!(snap.label, "moving_up");
        assert!(!snap.locked);
    }
}
