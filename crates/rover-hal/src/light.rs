//! On/off light outputs (headlight LEDs).

use rover_types::RoverError;

/// A discrete light output.
pub trait LightDriver: Send {
    /// Stable identifier for this light bank, e.g. `"headlights"`.
    fn id(&self) -> &str;

    /// Switch `channel` on or off.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] if the output cannot be driven.
    fn set_light(&mut self, channel: u8, on: bool) -> Result<(), RoverError>;

    /// Current state of `channel` (`false` when never switched).
    fn is_on(&self, channel: u8) -> bool;
}
