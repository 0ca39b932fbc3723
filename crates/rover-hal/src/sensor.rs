//! Read-only sensor capabilities polled by the acquisition tasks.

use rover_types::{ImuReading, RoverError};

/// Analog-to-digital converter with the battery divider on one channel.
pub trait AdcSource: Send {
    /// Read raw counts from `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] when the chip does not answer.
    fn read_adc_raw(&mut self, channel: u8) -> Result<u16, RoverError>;

    /// Counts corresponding to the full input range. An 8-bit ADS7830
    /// reading is widened by `* 257` so the default is `u16::MAX`.
    fn full_scale(&self) -> u16 {
        u16::MAX
    }
}

/// Six-axis inertial measurement unit.
pub trait ImuSource: Send {
    fn read_imu(&mut self) -> Result<ImuReading, RoverError>;
}

/// Ultrasonic (or similar) distance sensor.
pub trait RangeFinder: Send {
    /// Distance to the nearest obstacle in centimetres.
    fn read_distance_cm(&mut self) -> Result<f32, RoverError>;
}
