//! DC motor capability and an H-bridge adapter over a PWM chip.

use std::collections::HashMap;

use rover_types::{Direction, RoverError};

/// Full-scale duty of a 12-bit PWM chip.
pub const PWM_MAX_DUTY: u16 = 4095;

/// Raw PWM output, e.g. one channel of a PCA9685.
pub trait PwmChannel: Send {
    /// Set `channel` to `duty` counts out of [`PWM_MAX_DUTY`].
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] when the bus write fails.
    fn set_channel_duty(&mut self, channel: u8, duty: u16) -> Result<(), RoverError>;
}

/// A bank of bidirectional DC motors addressed by channel number.
pub trait MotorDriver: Send {
    /// Stable identifier, e.g. `"track_bridge"`.
    fn id(&self) -> &str;

    /// Drive motor `channel` in `direction` at `duty` percent (0–100).
    /// `None` brakes the motor to a stop.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] if the channel is unknown or the
    /// underlying output fails.
    fn set_motor(
        &mut self,
        channel: u8,
        direction: Option<Direction>,
        duty: u8,
    ) -> Result<(), RoverError>;
}

/// Two-input H-bridge motor driver built on top of a [`PwmChannel`].
///
/// Each motor is wired to a pair of PWM outputs `(in1, in2)`. Forward drives
/// `in1`, reverse drives `in2`, and stop pulls both low.
pub struct HBridgeMotor<P: PwmChannel> {
    id: String,
    pwm: P,
    pins: HashMap<u8, (u8, u8)>,
}

impl<P: PwmChannel> HBridgeMotor<P> {
    /// Motor 1 on outputs 15/14 and motor 2 on outputs 12/13.
    pub const DEFAULT_PINS: [(u8, (u8, u8)); 2] = [(1, (15, 14)), (2, (12, 13))];

    pub fn new(id: impl Into<String>, pwm: P) -> Self {
        Self {
            id: id.into(),
            pwm,
            pins: Self::DEFAULT_PINS.into_iter().collect(),
        }
    }

    /// Replace the pin pair for `channel`.
    pub fn with_pins(mut self, channel: u8, in1: u8, in2: u8) -> Self {
        self.pins.insert(channel, (in1, in2));
        self
    }

    fn counts(duty: u8) -> u16 {
        (u32::from(duty.min(100)) * u32::from(PWM_MAX_DUTY) / 100) as u16
    }
}

impl<P: PwmChannel> MotorDriver for HBridgeMotor<P> {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_motor(
        &mut self,
        channel: u8,
        direction: Option<Direction>,
        duty: u8,
    ) -> Result<(), RoverError> {
        let Some(&(in1, in2)) = self.pins.get(&channel) else {
            return Err(RoverError::HardwareFault {
                component: self.id.clone(),
                details: format!("motor channel {channel} is not wired"),
            });
        };
        let counts = Self::counts(duty);
        let (a, b) = match direction {
            Some(Direction::Positive) => (counts, 0),
            Some(Direction::Negative) => (0, counts),
            None => (0, 0),
        };
        self.pwm.set_channel_duty(in1, a)?;
        self.pwm.set_channel_duty(in2, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingPwm {
        writes: Vec<(u8, u16)>,
    }

    impl PwmChannel for RecordingPwm {
        fn set_channel_duty(&mut self, channel: u8, duty: u16) -> Result<(), RoverError> {
            self.writes.push((channel, duty));
            Ok(())
        }
    }

    struct BrokenPwm;

    impl PwmChannel for BrokenPwm {
        fn set_channel_duty(&mut self, channel: u8, _duty: u16) -> Result<(), RoverError> {
            Err(RoverError::HardwareFault {
                component: "pca9685".into(),
                details: format!("i2c nack on output {channel}"),
            })
        }
    }

    #[test]
    fn forward_drives_in1_only() {
        let mut motor = HBridgeMotor::new("bridge", RecordingPwm::default());
        motor.set_motor(1, Some(Direction::Positive), 100).unwrap();
        assert_eq!(motor.pwm.writes, vec![(15, 4095), (14, 0)]);
    }

    #[test]
    fn reverse_drives_in2_and_scales_duty() {
        let mut motor = HBridgeMotor::new("bridge", RecordingPwm::default());
        motor.set_motor(2, Some(Direction::Negative), 50).unwrap();
        assert_eq!(motor.pwm.writes, vec![(12, 0), (13, 2047)]);
    }

    #[test]
    fn stop_pulls_both_inputs_low() {
        let mut motor = HBridgeMotor::new("bridge", RecordingPwm::default());
        motor.set_motor(1, None, 80).unwrap();
        assert_eq!(motor.pwm.writes, vec![(15, 0), (14, 0)]);
    }

    #[test]
    fn duty_above_hundred_is_capped() {
        let mut motor = HBridgeMotor::new("bridge", RecordingPwm::default());
        motor.set_motor(1, Some(Direction::Positive), 250).unwrap();
        assert_eq!(motor.pwm.writes[0], (15, 4095));
    }

    #[test]
    fn unknown_channel_is_a_hardware_fault() {
        let mut motor = HBridgeMotor::new("bridge", RecordingPwm::default());
        let err = motor.set_motor(9, Some(Direction::Positive), 10).unwrap_err();
        assert!(matches!(err, RoverError::HardwareFault { .. }));
        assert!(motor.pwm.writes.is_empty());
    }

    #[test]
    fn custom_pins_override_defaults() {
        let mut motor = HBridgeMotor::new("bridge", RecordingPwm::default()).with_pins(1, 3, 4);
        motor.set_motor(1, Some(Direction::Negative), 100).unwrap();
        assert_eq!(motor.pwm.writes, vec![(3, 0), (4, 4095)]);
    }

    #[test]
    fn pwm_failure_propagates() {
        let mut motor = HBridgeMotor::new("bridge", BrokenPwm);
        assert!(motor.set_motor(1, None, 0).is_err());
    }
}
