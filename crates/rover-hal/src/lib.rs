//! Hardware abstraction layer for the rover.
//!
//! Register-level drivers (PWM chip, ADC chip, GPIO lines) live outside this
//! crate. They are consumed through the narrow capability traits defined
//! here, and the [`ActuatorBank`] routes every
//! [`ActuatorCall`][rover_types::ActuatorCall] to the one driver that owns
//! its channel.

pub mod bank;
pub mod buzzer;
pub mod light;
pub mod motor;
pub mod ramp;
pub mod sensor;
pub mod servo;
pub mod sim;
pub mod switch;

pub use bank::{ActuatorBank, TrackChannels};
pub use buzzer::{BeepPattern, Buzzer};
pub use light::LightDriver;
pub use motor::{HBridgeMotor, MotorDriver, PWM_MAX_DUTY, PwmChannel};
pub use ramp::{TrackRamp, TrackSpeeds};
pub use sensor::{AdcSource, ImuSource, RangeFinder};
pub use servo::ServoDriver;
pub use switch::SwitchDriver;
