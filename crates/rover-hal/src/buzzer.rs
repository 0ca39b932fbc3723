//! Acknowledgement buzzer.

use rover_types::RoverError;

/// Beep sequences the rover plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeepPattern {
    /// One 50 ms beep: a drive or light command was taken.
    Tick,
    /// Two 50 ms beeps: the gripper started moving.
    Double,
    /// Two 200 ms beeps: the rover is up.
    Alert,
}

pub trait Buzzer: Send {
    fn id(&self) -> &str;

    /// Start `pattern` and return without waiting for it to finish.
    fn beep(&mut self, pattern: BeepPattern) -> Result<(), RoverError>;
}
