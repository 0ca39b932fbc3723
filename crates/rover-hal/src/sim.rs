//! In-process simulation drivers for running the rover without hardware.
//!
//! Every simulated actuator appends to a shared [`SimLog`], so tests can see
//! exactly which hardware calls were issued. The `rover` binary runs on
//! these drivers. Faults can be injected per output to exercise the recovery path.
//!
//! The tracks are simulated either as a motor bridge taking direction and
//! duty ([`SimMotorBridge`]) or as an [`HBridgeMotor`] over a simulated PWM
//! chip ([`SimPwm`]), selected with [`SimRig::with_pwm_motors`].
//!
//! # Example
//!
//! ```rust
//! use rover_hal::sim::SimRig;
//! use rover_types::{ActuatorAction, ActuatorCall, Axis};
//!
//! let rig = SimRig::new();
//! let bank = rig.bank();
//! bank.apply(&ActuatorCall::new(
//!     Axis::Headlight,
//!     ActuatorAction::Light { channel: 0, on: true },
//! ))
//! .expect("sim light must succeed");
//! assert_eq!(rig.log.calls().len(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rover_types::{Direction, ImuReading, RoverError};

use crate::bank::ActuatorBank;
use crate::buzzer::{BeepPattern, Buzzer};
use crate::light::LightDriver;
use crate::motor::{HBridgeMotor, MotorDriver, PwmChannel};
use crate::sensor::{AdcSource, ImuSource, RangeFinder};
use crate::servo::ServoDriver;
use crate::switch::SwitchDriver;

// ────────────────────────────────────────────────────────────────────────────
// Shared call log
// ────────────────────────────────────────────────────────────────────────────

/// One hardware call observed by a simulated driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Motor {
        channel: u8,
        direction: Option<Direction>,
        duty: u8,
    },
    Servo {
        channel: u8,
        angle: f32,
    },
    Sweep {
        channel: u8,
        direction: Direction,
        speed: u8,
    },
    Hold {
        channel: u8,
    },
    Limits {
        channel: u8,
        min: f32,
        max: f32,
    },
    Light {
        channel: u8,
        on: bool,
    },
    Switch {
        channel: u8,
        on: bool,
    },
    /// Raw PWM chip write.
    Pwm {
        channel: u8,
        duty: u16,
    },
}

impl SimCall {
    fn fault_key(&self) -> Option<FaultKey> {
        match *self {
            SimCall::Motor { channel, .. } => Some(FaultKey::Motor(channel)),
            SimCall::Servo { channel, .. }
            | SimCall::Sweep { channel, .. }
            | SimCall::Hold { channel } => Some(FaultKey::Servo(channel)),
            SimCall::Light { channel, .. } => Some(FaultKey::Light(channel)),
            SimCall::Switch { channel, .. } => Some(FaultKey::Switch(channel)),
            SimCall::Pwm { channel, .. } => Some(FaultKey::Pwm(channel)),
            SimCall::Limits { .. } => None,
        }
    }
}

/// Output addressed by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKey {
    Motor(u8),
    Servo(u8),
    Light(u8),
    Switch(u8),
    Pwm(u8),
}

/// Shared, cloneable record of every simulated hardware call.
#[derive(Clone, Default)]
pub struct SimLog {
    calls: Arc<Mutex<Vec<SimCall>>>,
    faults: Arc<Mutex<HashSet<FaultKey>>>,
    beeps: Arc<Mutex<Vec<BeepPattern>>>,
    sweep_delay: Arc<Mutex<Duration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all successful calls so far, oldest first.
    pub fn calls(&self) -> Vec<SimCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Number of successful calls on motor `channel`.
    pub fn motor_calls(&self, channel: u8) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, SimCall::Motor { channel: ch, .. } if *ch == channel))
            .count()
    }

    /// Number of successful motion calls (set/sweep/hold) on servo `channel`.
    pub fn servo_calls(&self, channel: u8) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.fault_key() == Some(FaultKey::Servo(channel)))
            .count()
    }

    /// Last duty written to PWM output `channel`.
    pub fn pwm_duty(&self, channel: u8) -> Option<u16> {
        lock(&self.calls).iter().rev().find_map(|c| match *c {
            SimCall::Pwm { channel: ch, duty } if ch == channel => Some(duty),
            _ => None,
        })
    }

    /// Buzzer patterns played so far. Kept apart from [`calls`](Self::calls).
    pub fn beeps(&self) -> Vec<BeepPattern> {
        lock(&self.beeps).clone()
    }

    /// Make every following call on `key` fail.
    pub fn inject_fault(&self, key: FaultKey) {
        lock(&self.faults).insert(key);
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Make every following servo sweep take `delay`, like a slow bus.
    pub fn set_sweep_delay(&self, delay: Duration) {
        *lock(&self.sweep_delay) = delay;
    }

    fn record(&self, component: &str, call: SimCall) -> Result<(), RoverError> {
        if let Some(key) = call.fault_key() {
            if lock(&self.faults).contains(&key) {
                return Err(RoverError::HardwareFault {
                    component: component.to_string(),
                    details: format!("injected fault on {key:?}"),
                });
            }
        }
        lock(&self.calls).push(call);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Actuators
// ────────────────────────────────────────────────────────────────────────────

/// Simulated motor bridge. Records every `set_motor` call.
pub struct SimMotorBridge {
    id: String,
    log: SimLog,
}

impl SimMotorBridge {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self { id: id.into(), log })
    }
}

impl MotorDriver for SimMotorBridge {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_motor(
        &mut self,
        channel: u8,
        direction: Option<Direction>,
        duty: u8,
    ) -> Result<(), RoverError> {
        self.log.record(
            &self.id,
            SimCall::Motor {
                channel,
                direction,
                duty,
            },
        )
    }
}

/// Simulated servo bus. Angles are clamped to per-channel travel limits
/// (0–180° by default).
pub struct SimServoBus {
    id: String,
    log: SimLog,
    angles: HashMap<u8, f32>,
    limits: HashMap<u8, (f32, f32)>,
}

impl SimServoBus {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            log,
            angles: HashMap::new(),
            limits: HashMap::new(),
        })
    }

    fn limits(&self, channel: u8) -> (f32, f32) {
        self.limits.get(&channel).copied().unwrap_or((0.0, 180.0))
    }
}

impl ServoDriver for SimServoBus {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_servo(&mut self, channel: u8, angle: f32) -> Result<(), RoverError> {
        let (min, max) = self.limits(channel);
        let angle = angle.clamp(min, max);
        self.log.record(&self.id, SimCall::Servo { channel, angle })?;
        self.angles.insert(channel, angle);
        Ok(())
    }

    fn sweep(&mut self, channel: u8, direction: Direction, speed: u8) -> Result<(), RoverError> {
        let delay = *lock(&self.log.sweep_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.log.record(
            &self.id,
            SimCall::Sweep {
                channel,
                direction,
                speed,
            },
        )
    }

    fn hold(&mut self, channel: u8) -> Result<(), RoverError> {
        self.log.record(&self.id, SimCall::Hold { channel })
    }

    fn set_limits(&mut self, channel: u8, min: f32, max: f32) -> Result<(), RoverError> {
        self.log
            .record(&self.id, SimCall::Limits { channel, min, max })?;
        self.limits.insert(channel, (min, max));
        if let Some(angle) = self.angles.get_mut(&channel) {
            *angle = angle.clamp(min, max);
        }
        Ok(())
    }

    fn angle(&self, channel: u8) -> Option<f32> {
        self.angles.get(&channel).copied()
    }
}

/// Simulated light bank.
pub struct SimLights {
    id: String,
    log: SimLog,
    state: HashSet<u8>,
}

impl SimLights {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            log,
            state: HashSet::new(),
        })
    }
}

impl LightDriver for SimLights {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_light(&mut self, channel: u8, on: bool) -> Result<(), RoverError> {
        self.log.record(&self.id, SimCall::Light { channel, on })?;
        if on {
            self.state.insert(channel);
        } else {
            self.state.remove(&channel);
        }
        Ok(())
    }

    fn is_on(&self, channel: u8) -> bool {
        self.state.contains(&channel)
    }
}

/// Simulated GPIO switch outputs.
pub struct SimSwitches {
    id: String,
    log: SimLog,
    state: HashSet<u8>,
}

impl SimSwitches {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            log,
            state: HashSet::new(),
        })
    }
}

impl SwitchDriver for SimSwitches {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_switch(&mut self, channel: u8, on: bool) -> Result<(), RoverError> {
        self.log.record(&self.id, SimCall::Switch { channel, on })?;
        if on {
            self.state.insert(channel);
        } else {
            self.state.remove(&channel);
        }
        Ok(())
    }

    fn is_on(&self, channel: u8) -> bool {
        self.state.contains(&channel)
    }
}

/// Simulated 12-bit PWM chip. Records every output write.
pub struct SimPwm {
    id: String,
    log: SimLog,
}

impl SimPwm {
    pub fn new(id: impl Into<String>, log: SimLog) -> Self {
        Self { id: id.into(), log }
    }
}

impl PwmChannel for SimPwm {
    fn set_channel_duty(&mut self, channel: u8, duty: u16) -> Result<(), RoverError> {
        self.log.record(&self.id, SimCall::Pwm { channel, duty })
    }
}

/// Simulated buzzer. Patterns go to [`SimLog::beeps`].
pub struct SimBuzzer {
    log: SimLog,
}

impl SimBuzzer {
    pub fn new(log: SimLog) -> Box<Self> {
        Box::new(Self { log })
    }
}

impl Buzzer for SimBuzzer {
    fn id(&self) -> &str {
        "sim_buzzer"
    }

    fn beep(&mut self, pattern: BeepPattern) -> Result<(), RoverError> {
        lock(&self.log.beeps).push(pattern);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensors
// ────────────────────────────────────────────────────────────────────────────

/// Raw ADC counts corresponding to roughly 7.7 V on the default divider.
pub const SIM_DEFAULT_RAW: u16 = 60_000;

/// Programmable simulated ADC. `None` makes every read fail.
#[derive(Clone)]
pub struct SimAdc {
    raw: Arc<Mutex<Option<u16>>>,
}

impl SimAdc {
    pub fn new(raw: u16) -> Self {
        Self {
            raw: Arc::new(Mutex::new(Some(raw))),
        }
    }

    pub fn set_raw(&self, raw: u16) {
        *lock(&self.raw) = Some(raw);
    }

    /// Simulate an unreachable chip.
    pub fn disconnect(&self) {
        *lock(&self.raw) = None;
    }
}

impl AdcSource for SimAdc {
    fn read_adc_raw(&mut self, channel: u8) -> Result<u16, RoverError> {
        (*lock(&self.raw)).ok_or_else(|| RoverError::HardwareFault {
            component: "sim_adc".into(),
            details: format!("no answer on channel {channel}"),
        })
    }
}

/// Simulated IMU reporting a level, stationary rover.
pub struct SimImu;

impl ImuSource for SimImu {
    fn read_imu(&mut self) -> Result<ImuReading, RoverError> {
        Ok(ImuReading {
            accel: [0.0, 0.0, 1.0],
            gyro: [0.0, 0.0, 0.0],
            temperature_c: 25.0,
        })
    }
}

/// Programmable simulated distance sensor. `None` makes reads fail.
#[derive(Clone)]
pub struct SimRangeFinder {
    distance: Arc<Mutex<Option<f32>>>,
}

impl SimRangeFinder {
    pub fn new(distance_cm: f32) -> Self {
        Self {
            distance: Arc::new(Mutex::new(Some(distance_cm))),
        }
    }

    pub fn set_distance(&self, distance_cm: f32) {
        *lock(&self.distance) = Some(distance_cm);
    }

    pub fn disconnect(&self) {
        *lock(&self.distance) = None;
    }
}

impl RangeFinder for SimRangeFinder {
    fn read_distance_cm(&mut self) -> Result<f32, RoverError> {
        (*lock(&self.distance)).ok_or_else(|| RoverError::HardwareFault {
            component: "sim_range".into(),
            details: "echo timeout".into(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRig
// ────────────────────────────────────────────────────────────────────────────

/// A complete simulated rover: actuators sharing one [`SimLog`] plus
/// programmable sensors whose handles stay with the rig.
#[derive(Clone)]
pub struct SimRig {
    pub log: SimLog,
    pub adc: SimAdc,
    pub range: SimRangeFinder,
    pwm_motors: bool,
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRig {
    pub fn new() -> Self {
        Self {
            log: SimLog::new(),
            adc: SimAdc::new(SIM_DEFAULT_RAW),
            range: SimRangeFinder::new(100.0),
            pwm_motors: false,
        }
    }

    /// Drive the tracks through an [`HBridgeMotor`] on a [`SimPwm`] chip.
    /// Track calls then show up as [`SimCall::Pwm`] writes.
    pub fn with_pwm_motors(mut self) -> Self {
        self.pwm_motors = true;
        self
    }

    /// Build an [`ActuatorBank`] whose drivers record into this rig's log.
    pub fn bank(&self) -> ActuatorBank {
        let motors: Box<dyn MotorDriver> = if self.pwm_motors {
            Box::new(HBridgeMotor::new(
                "sim_tracks",
                SimPwm::new("sim_pca9685", self.log.clone()),
            ))
        } else {
            SimMotorBridge::new("sim_tracks", self.log.clone())
        };
        ActuatorBank::new(
            motors,
            SimServoBus::new("sim_servos", self.log.clone()),
            SimLights::new("sim_lights", self.log.clone()),
        )
        .with_switches(SimSwitches::new("sim_switches", self.log.clone()))
        .with_buzzer(SimBuzzer::new(self.log.clone()))
    }

    pub fn adc_source(&self) -> Box<dyn AdcSource> {
        Box::new(self.adc.clone())
    }

    pub fn imu_source(&self) -> Box<dyn ImuSource> {
        Box::new(SimImu)
    }

    pub fn range_finder(&self) -> Box<dyn RangeFinder> {
        Box::new(self.range.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
