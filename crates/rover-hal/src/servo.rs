//! Hobby-servo capability for the arm joints and the camera tilt.

use rover_types::{Direction, RoverError};

/// A bus of position servos addressed by channel number.
///
/// Continuous motion is the driver's concern: [`ServoDriver::sweep`] starts
/// the servo stepping toward its travel limit and [`ServoDriver::hold`]
/// freezes it wherever it is.
pub trait ServoDriver: Send {
    /// Stable identifier, e.g. `"servo_bus"`.
    fn id(&self) -> &str;

    /// Move `channel` to `angle` degrees, clamped to its travel limits.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] if the bus write fails.
    fn set_servo(&mut self, channel: u8, angle: f32) -> Result<(), RoverError>;

    /// Start sweeping `channel` in `direction`, `speed` degrees per step.
    fn sweep(&mut self, channel: u8, direction: Direction, speed: u8) -> Result<(), RoverError>;

    /// Stop a sweep and hold the current angle.
    fn hold(&mut self, channel: u8) -> Result<(), RoverError>;

    /// Bound the travel of `channel` to `[min, max]` degrees.
    fn set_limits(&mut self, channel: u8, min: f32, max: f32) -> Result<(), RoverError>;

    /// Last commanded angle of `channel`, if any.
    fn angle(&self, channel: u8) -> Option<f32>;
}
