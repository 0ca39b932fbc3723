//! [`Drivetrain`] – the overlapping drive and turn axes.
//!
//! Drive and turn have independent state machines but share the two track
//! motors. Every transition emits one
//! [`ActuatorAction::Tracks`] call carrying the *combined* state, so
//! releasing one input (`DS` or `TS`) never clears the other.

use chrono::{DateTime, Utc};
use rover_types::{ActuatorAction, ActuatorCall, Axis, Direction, PowerMode, RoverError};

use crate::axis::{AxisMachine, Transition};

pub struct Drivetrain {
    drive: AxisMachine,
    turn: AxisMachine,
    speed: u8,
    mode: PowerMode,
}

impl Drivetrain {
    pub fn new(speed: u8) -> Self {
        Self {
            drive: AxisMachine::new(Axis::Drive),
            turn: AxisMachine::new(Axis::Turn),
            speed: speed.min(100),
            mode: PowerMode::Active,
        }
    }

    pub fn machine(&self, axis: Axis) -> Option<&AxisMachine> {
        match axis {
            Axis::Drive => Some(&self.drive),
            Axis::Turn => Some(&self.turn),
            _ => None,
        }
    }

    fn machine_mut(&mut self, axis: Axis) -> Result<&mut AxisMachine, RoverError> {
        match axis {
            Axis::Drive => Ok(&mut self.drive),
            Axis::Turn => Ok(&mut self.turn),
            other => Err(RoverError::Parse(format!("{other} is not a drivetrain axis"))),
        }
    }

    /// Requested speed in percent. Does not change motion state.
    pub fn set_speed(&mut self, speed: u8) {
        self.speed = speed.min(100);
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn set_mode(&mut self, mode: PowerMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> PowerMode {
        self.mode
    }

    /// Duty handed to the motors: the requested speed, halved in eco mode.
    pub fn effective_duty(&self) -> u8 {
        match self.mode {
            PowerMode::Active => self.speed,
            PowerMode::Eco => self.speed / 2,
        }
    }

    /// Move `axis` (drive or turn) in `direction`, or stop it when
    /// `direction` is `None`. Returns the track call to issue, if any.
    pub fn command(
        &mut self,
        axis: Axis,
        direction: Option<Direction>,
        now: DateTime<Utc>,
    ) -> Result<Option<ActuatorCall>, RoverError> {
        let machine = self.machine_mut(axis)?;
        let transition = match direction {
            Some(direction) => machine.request_move(direction, now)?,
            None => machine.request_stop(now),
        };
        Ok((transition == Transition::Actuate).then(|| self.tracks_call(axis)))
    }

    /// Stop both axes. Returns a single neutral track call when anything was
    /// moving.
    pub fn stop_all(&mut self, now: DateTime<Utc>) -> Option<ActuatorCall> {
        let drive = self.drive.request_stop(now);
        let turn = self.turn.request_stop(now);
        (drive.actuates() || turn.actuates()).then(|| self.tracks_call(Axis::Drive))
    }

    /// Drop both axes to idle after a fault and return the neutral call to
    /// attempt.
    pub fn force_idle(&mut self, now: DateTime<Utc>) -> ActuatorCall {
        self.drive.force_idle(now);
        self.turn.force_idle(now);
        self.tracks_call(Axis::Drive)
    }

    fn tracks_call(&self, axis: Axis) -> ActuatorCall {
        ActuatorCall::new(
            axis,
            ActuatorAction::Tracks {
                linear: self.drive.state().sign(),
                angular: self.turn.state().sign(),
                duty: self.effective_duty(),
            },
        )
    }
}
