//! Joint init angles ("trims") and where they are kept.
//!
//! Every joint has an init angle it returns to on `home` and `PWMINIT`.
//! Operators nudge it one degree at a time and then save it. Saving goes
//! through a [`TrimStore`], so the kernel itself never touches the disk.

use std::collections::BTreeMap;

use rover_types::RoverError;

/// Init angle of every joint before any trim.
pub const DEFAULT_INIT_ANGLE: f32 = 90.0;

/// Init angles keyed by servo channel.
pub type InitAngles = BTreeMap<u8, f32>;

/// Durable home for joint init angles.
pub trait TrimStore: Send + Sync {
    /// Persist the init angle of one servo channel.
    fn save(&self, channel: u8, angle: f32) -> Result<(), RoverError>;

    /// Replace every persisted init angle.
    fn save_all(&self, angles: &InitAngles) -> Result<(), RoverError>;
}

/// Clamp an init angle into the servo range.
pub fn clamp_angle(angle: f32) -> f32 {
    angle.clamp(0.0, 180.0)
}
