//! GPIO switch outputs.

use rover_types::RoverError;

/// Bank of on/off outputs addressed by switch number (1-based).
pub trait SwitchDriver: Send {
    fn id(&self) -> &str;

    /// Drive switch `channel` high (`on`) or low.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] when the pin cannot be written.
    fn set_switch(&mut self, channel: u8, on: bool) -> Result<(), RoverError>;

    fn is_on(&self, channel: u8) -> bool;
}
