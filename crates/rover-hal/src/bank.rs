//! [`ActuatorBank`] – single owner of every actuator output.
//!
//! Every [`ActuatorCall`] is routed to exactly one driver: track mixing goes
//! to the [`MotorDriver`], joint motion to the [`ServoDriver`], light
//! switching to the [`LightDriver`], and GPIO outputs to the
//! [`SwitchDriver`]. No two axes share a channel, so the bank never issues
//! overlapping calls on the same output.
//!
//! Each bus sits behind its own lock. A call only waits for calls on the
//! same bus: a slow servo sweep never delays a track stop.
//!
//! # Track mixing
//!
//! [`ActuatorAction::Tracks`] carries the combined drive (`linear`) and turn
//! (`angular`) states. Positive `angular` turns right. The per-track signs
//! are
//!
//! ```text
//! left  = clamp(linear + angular, -1, 1)
//! right = clamp(linear - angular, -1, 1)
//! ```
//!
//! so turning in place drives the tracks in opposite directions and turning
//! while driving forward pivots on the inner track.
//!
//! With a [`TrackRamp`] fitted, track calls only set the target speed and
//! [`ActuatorBank::ramp_step`] writes the slewed output.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rover_types::{ActuatorAction, ActuatorCall, Direction, RoverError};
use tracing::debug;

use crate::buzzer::{BeepPattern, Buzzer};
use crate::light::LightDriver;
use crate::motor::MotorDriver;
use crate::ramp::{TrackRamp, TrackSpeeds};
use crate::servo::ServoDriver;
use crate::switch::SwitchDriver;

/// Motor channels carrying the left and right tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackChannels {
    pub left: u8,
    pub right: u8,
}

impl Default for TrackChannels {
    fn default() -> Self {
        Self { left: 1, right: 2 }
    }
}

struct MotorBus {
    driver: Box<dyn MotorDriver>,
    ramp: Option<TrackRamp>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes [`ActuatorCall`]s to the driver owning the addressed output.
pub struct ActuatorBank {
    motors: Mutex<MotorBus>,
    servos: Mutex<Box<dyn ServoDriver>>,
    lights: Mutex<Box<dyn LightDriver>>,
    switches: Option<Mutex<Box<dyn SwitchDriver>>>,
    buzzer: Option<Mutex<Box<dyn Buzzer>>>,
    tracks: TrackChannels,
}

impl ActuatorBank {
    pub fn new(
        motors: Box<dyn MotorDriver>,
        servos: Box<dyn ServoDriver>,
        lights: Box<dyn LightDriver>,
    ) -> Self {
        Self {
            motors: Mutex::new(MotorBus {
                driver: motors,
                ramp: None,
            }),
            servos: Mutex::new(servos),
            lights: Mutex::new(lights),
            switches: None,
            buzzer: None,
            tracks: TrackChannels::default(),
        }
    }

    pub fn with_tracks(mut self, tracks: TrackChannels) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn with_switches(mut self, switches: Box<dyn SwitchDriver>) -> Self {
        self.switches = Some(Mutex::new(switches));
        self
    }

    pub fn with_buzzer(mut self, buzzer: Box<dyn Buzzer>) -> Self {
        self.buzzer = Some(Mutex::new(buzzer));
        self
    }

    /// Limit track acceleration to `accel_limit` percent per second. A
    /// non-positive limit leaves the tracks unramped.
    pub fn with_ramp(mut self, accel_limit: f32) -> Self {
        let bus = self
            .motors
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        bus.ramp = (accel_limit > 0.0).then(|| TrackRamp::new(accel_limit));
        self
    }

    pub fn is_ramped(&self) -> bool {
        lock(&self.motors).ramp.is_some()
    }

    /// Apply one actuator call.
    ///
    /// # Errors
    ///
    /// Propagates the driver's [`RoverError::HardwareFault`].
    pub fn apply(&self, call: &ActuatorCall) -> Result<(), RoverError> {
        debug!(axis = %call.axis, action = ?call.action, "actuator call");
        match call.action {
            ActuatorAction::Tracks {
                linear,
                angular,
                duty,
            } => {
                let duty = f32::from(duty.min(100));
                let target = [
                    f32::from((linear + angular).clamp(-1, 1)) * duty,
                    f32::from((linear - angular).clamp(-1, 1)) * duty,
                ];
                let mut bus = lock(&self.motors);
                match bus.ramp.as_mut() {
                    Some(ramp) => {
                        ramp.set_target(target);
                        Ok(())
                    }
                    None => self.write_tracks(&mut bus, target),
                }
            }
            ActuatorAction::Sweep {
                channel,
                direction,
                speed,
            } => lock(&self.servos).sweep(channel, direction, speed),
            ActuatorAction::Hold { channel } => lock(&self.servos).hold(channel),
            ActuatorAction::SetAngle { channel, angle } => {
                lock(&self.servos).set_servo(channel, angle)
            }
            ActuatorAction::Light { channel, on } => lock(&self.lights).set_light(channel, on),
            ActuatorAction::Switch { channel, on } => match &self.switches {
                Some(switches) => lock(switches).set_switch(channel, on),
                None => Err(RoverError::HardwareFault {
                    component: "switches".into(),
                    details: format!("no switch driver fitted for switch {channel}"),
                }),
            },
        }
    }

    /// Advance the track ramp by `dt` and write the new output. Returns
    /// `true` when an output was written.
    pub fn ramp_step(&self, dt: Duration) -> Result<bool, RoverError> {
        let mut bus = lock(&self.motors);
        let Some(next) = bus.ramp.as_mut().and_then(|ramp| ramp.step(dt)) else {
            return Ok(false);
        };
        self.write_tracks(&mut bus, next)?;
        Ok(true)
    }

    /// Stop both tracks now, bypassing the ramp.
    pub fn halt_tracks(&self) -> Result<(), RoverError> {
        let mut bus = lock(&self.motors);
        if let Some(ramp) = bus.ramp.as_mut() {
            ramp.halt();
        }
        self.write_tracks(&mut bus, [0.0; 2])
    }

    /// Bound the travel of a servo channel.
    pub fn set_servo_limits(&self, channel: u8, min: f32, max: f32) -> Result<(), RoverError> {
        lock(&self.servos).set_limits(channel, min, max)
    }

    /// Last commanded angle of a servo channel.
    pub fn servo_angle(&self, channel: u8) -> Option<f32> {
        lock(&self.servos).angle(channel)
    }

    pub fn light_on(&self, channel: u8) -> bool {
        lock(&self.lights).is_on(channel)
    }

    pub fn switch_on(&self, channel: u8) -> bool {
        self.switches
            .as_ref()
            .is_some_and(|switches| lock(switches).is_on(channel))
    }

    /// Play `pattern` on the buzzer, if one is fitted.
    pub fn beep(&self, pattern: BeepPattern) -> Result<(), RoverError> {
        match &self.buzzer {
            Some(buzzer) => lock(buzzer).beep(pattern),
            None => Ok(()),
        }
    }

    fn write_tracks(&self, bus: &mut MotorBus, speeds: TrackSpeeds) -> Result<(), RoverError> {
        let [left, right] = speeds;
        drive_track(bus.driver.as_mut(), self.tracks.left, left)?;
        drive_track(bus.driver.as_mut(), self.tracks.right, right)
    }
}

/// Write a signed speed in percent to one track motor.
fn drive_track(driver: &mut dyn MotorDriver, channel: u8, speed: f32) -> Result<(), RoverError> {
    let duty = speed.abs().round().min(100.0) as u8;
    let direction = match speed {
        _ if duty == 0 => None,
        s if s > 0.0 => Some(Direction::Positive),
        _ => Some(Direction::Negative),
    };
    driver.set_motor(channel, direction, duty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FaultKey, SimCall, SimLights, SimMotorBridge, SimRig, SimServoBus};
    use rover_types::Axis;

    fn tracks(linear: i8, angular: i8, duty: u8) -> ActuatorCall {
        ActuatorCall::new(
            Axis::Drive,
            ActuatorAction::Tracks {
                linear,
                angular,
                duty,
            },
        )
    }

    #[test]
    fn forward_drives_both_tracks_forward() {
        let rig = SimRig::new();
        let bank = rig.bank();
        bank.apply(&tracks(1, 0, 60)).unwrap();
        assert_eq!(
            rig.log.calls(),
            vec![
                SimCall::Motor {
                    channel: 1,
                    direction: Some(Direction::Positive),
                    duty: 60
                },
                SimCall::Motor {
                    channel: 2,
                    direction: Some(Direction::Positive),
                    duty: 60
                },
            ]
        );
    }

    #[test]
    fn turn_in_place_counter_rotates_tracks() {
        let rig = SimRig::new();
        let bank = rig.bank();
        // Left turn: left track backward, right track forward.
        bank.apply(&tracks(0, -1, 40)).unwrap();
        let calls = rig.log.calls();
        assert!(matches!(
            calls[0],
            SimCall::Motor {
                channel: 1,
                direction: Some(Direction::Negative),
                ..
            }
        ));
        assert!(matches!(
            calls[1],
            SimCall::Motor {
                channel: 2,
                direction: Some(Direction::Positive),
                ..
            }
        ));
    }

    #[test]
    fn forward_while_turning_right_pivots_on_right_track() {
        let rig = SimRig::new();
        let bank = rig.bank();
        bank.apply(&tracks(1, 1, 50)).unwrap();
        let calls = rig.log.calls();
        assert_eq!(
            calls[1],
            SimCall::Motor {
                channel: 2,
                direction: None,
                duty: 0
            }
        );
    }

    #[test]
    fn zero_duty_stops_tracks() {
        let rig = SimRig::new();
        let bank = rig.bank();
        bank.apply(&tracks(1, 0, 0)).unwrap();
        assert!(rig.log.calls().iter().all(|c| matches!(
            c,
            SimCall::Motor {
                direction: None,
                duty: 0,
                ..
            }
        )));
    }

    #[test]
    fn joint_calls_reach_the_servo_bus() {
        let rig = SimRig::new();
        let bank = rig.bank();
        bank.apply(&ActuatorCall::new(
            Axis::Wrist,
            ActuatorAction::SetAngle {
                channel: 1,
                angle: 45.0,
            },
        ))
        .unwrap();
        assert_eq!(bank.servo_angle(1), Some(45.0));
    }

    #[test]
    fn light_calls_reach_the_light_driver() {
        let rig = SimRig::new();
        let bank = rig.bank();
        bank.apply(&ActuatorCall::new(
            Axis::Headlight,
            ActuatorAction::Light {
                channel: 0,
                on: true,
            },
        ))
        .unwrap();
        assert!(bank.light_on(0));
    }

    #[test]
    fn injected_fault_surfaces_as_hardware_fault() {
        let rig = SimRig::new();
        rig.log.inject_fault(FaultKey::Servo(0));
        let bank = rig.bank();
        let err = bank
            .apply(&ActuatorCall::new(
                Axis::Shoulder,
                ActuatorAction::Hold { channel: 0 },
            ))
            .unwrap_err();
        assert!(matches!(err, RoverError::HardwareFault { .. }));
    }

    #[test]
    fn ramped_tracks_only_move_on_steps() {
        let rig = SimRig::new();
        let bank = rig.bank().with_ramp(200.0);
        assert!(bank.is_ramped());
        bank.apply(&tracks(1, 0, 100)).unwrap();
        assert!(rig.log.calls().is_empty());

        assert!(bank.ramp_step(Duration::from_millis(100)).unwrap());
        assert_eq!(
            rig.log.calls()[0],
            SimCall::Motor {
                channel: 1,
                direction: Some(Direction::Positive),
                duty: 20
            }
        );
        while bank.ramp_step(Duration::from_millis(100)).unwrap() {}
        assert_eq!(
            rig.log.calls().last(),
            Some(&SimCall::Motor {
                channel: 2,
                direction: Some(Direction::Positive),
                duty: 100
            })
        );
        // Five steps of two tracks each.
        assert_eq!(rig.log.motor_calls(1), 5);
    }

    #[test]
    fn halt_bypasses_the_ramp() {
        let rig = SimRig::new();
        let bank = rig.bank().with_ramp(200.0);
        bank.apply(&tracks(1, 0, 100)).unwrap();
        bank.ramp_step(Duration::from_millis(100)).unwrap();
        rig.log.clear();

        bank.halt_tracks().unwrap();
        assert_eq!(rig.log.motor_calls(1), 1);
        assert_eq!(rig.log.motor_calls(2), 1);
        assert!(!bank.ramp_step(Duration::from_millis(100)).unwrap());
    }

    #[test]
    fn zero_limit_leaves_tracks_unramped() {
        let rig = SimRig::new();
        let bank = rig.bank().with_ramp(0.0);
        assert!(!bank.is_ramped());
        bank.apply(&tracks(-1, 0, 30)).unwrap();
        assert_eq!(rig.log.motor_calls(1), 1);
    }

    #[test]
    fn switch_calls_reach_the_switch_driver() {
        let rig = SimRig::new();
        let bank = rig.bank();
        bank.apply(&ActuatorCall::new(
            Axis::Switch2,
            ActuatorAction::Switch {
                channel: 2,
                on: true,
            },
        ))
        .unwrap();
        assert!(bank.switch_on(2));
        assert!(!bank.switch_on(1));
    }

    #[test]
    fn switches_without_a_driver_fault() {
        let rig = SimRig::new();
        let bank = ActuatorBank::new(
            SimMotorBridge::new("m", rig.log.clone()),
            SimServoBus::new("s", rig.log.clone()),
            SimLights::new("l", rig.log.clone()),
        );
        let err = bank
            .apply(&ActuatorCall::new(
                Axis::Switch1,
                ActuatorAction::Switch {
                    channel: 1,
                    on: true,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, RoverError::HardwareFault { .. }));
        // No buzzer fitted: beeping is silently skipped.
        assert!(bank.beep(BeepPattern::Tick).is_ok());
    }

    #[test]
    fn beeps_reach_the_buzzer() {
        let rig = SimRig::new();
        let bank = rig.bank();
        bank.beep(BeepPattern::Double).unwrap();
        assert_eq!(rig.log.beeps(), vec![BeepPattern::Double]);
        assert!(rig.log.calls().is_empty());
    }

    #[test]
    fn busy_servo_bus_does_not_delay_tracks() {
        let rig = SimRig::new();
        rig.log.set_sweep_delay(Duration::from_millis(1500));
        let bank = std::sync::Arc::new(rig.bank());
        let sweeping = {
            let bank = std::sync::Arc::clone(&bank);
            std::thread::spawn(move || {
                bank.apply(&ActuatorCall::new(
                    Axis::Wrist,
                    ActuatorAction::Sweep {
                        channel: 1,
                        direction: Direction::Positive,
                        speed: 2,
                    },
                ))
            })
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = std::time::Instant::now();
        bank.apply(&tracks(0, 0, 50)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        sweeping.join().unwrap().unwrap();
    }
}
