//! [`ControlKernel`] – executes commands against the actuator state machines.
//!
//! Each axis slot (the drivetrain, every joint, every on/off output) sits
//! behind its own mutex. A command locks only its slot, runs the
//! transition, and applies the resulting hardware call before releasing the
//! slot, so calls on one axis are strictly ordered while different axes
//! proceed independently. The [`ActuatorBank`] locks each bus on its own,
//! so a slot waits only for calls on the bus it drives. Lock order is
//! always slot, then bus.
//!
//! Execution is synchronous and may block on the hardware bus; async callers
//! run it on the blocking pool. Engaging the low-voltage interlock never
//! blocks: the shoulder reads the shared flag on its next move, and holding
//! a shoulder that is already rising is a separate call,
//! [`ControlKernel::hold_rising_shoulder`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rover_hal::{ActuatorBank, BeepPattern};
use rover_types::{
    ActuatorAction, ActuatorCall, Axis, AxisSnapshot, AxisState, Command, Direction, PowerMode,
    RoverError, ShoulderCalibration,
};
use tracing::{debug, info, instrument, warn};

use crate::axis::{AxisMachine, Transition};
use crate::board::AxisBoard;
use crate::drivetrain::Drivetrain;
use crate::trim::{DEFAULT_INIT_ANGLE, InitAngles, TrimStore, clamp_angle};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Servo wiring of one joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointConfig {
    pub axis: Axis,
    pub channel: u8,
    pub home_angle: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    /// Drive speed in percent before any `wsB` command.
    pub default_speed: u8,
    /// Servo sweep step in degrees.
    pub sweep_speed: u8,
    pub headlight_channel: u8,
    pub joints: Vec<JointConfig>,
    /// Track acceleration limit in percent per second. `0` writes track
    /// commands straight to the motors.
    pub accel_limit: f32,
    /// Beep after drive, light and gripper commands.
    pub acknowledge: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let joints = Axis::JOINTS
            .into_iter()
            .zip(0u8..)
            .map(|(axis, channel)| JointConfig {
                axis,
                channel,
                home_angle: DEFAULT_INIT_ANGLE,
            })
            .collect();
        Self {
            default_speed: 100,
            sweep_speed: 5,
            headlight_channel: 0,
            joints,
            accel_limit: 0.0,
            acknowledge: true,
        }
    }
}

impl KernelConfig {
    /// Use persisted init angles as the joints' home angles.
    pub fn with_init_angles(mut self, angles: &InitAngles) -> Self {
        for joint in &mut self.joints {
            if let Some(angle) = angles.get(&joint.channel) {
                joint.home_angle = clamp_angle(*angle);
            }
        }
        self
    }
}

/// Buzzer acknowledgement for a command that was carried out.
fn acknowledgement(command: &Command) -> Option<BeepPattern> {
    match command {
        Command::Move {
            axis: Axis::Drive | Axis::Turn,
            ..
        }
        | Command::Headlight { .. } => Some(BeepPattern::Tick),
        Command::Move {
            axis: Axis::Gripper,
            ..
        } => Some(BeepPattern::Double),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ControlKernel
// ────────────────────────────────────────────────────────────────────────────

struct JointSlot {
    machine: AxisMachine,
    channel: u8,
    home_angle: f32,
}

/// The headlight or a GPIO switch.
struct ToggleSlot {
    machine: AxisMachine,
    channel: u8,
}

impl ToggleSlot {
    fn call(&self, on: bool) -> ActuatorCall {
        let channel = self.channel;
        let action = match self.machine.axis() {
            Axis::Headlight => ActuatorAction::Light { channel, on },
            _ => ActuatorAction::Switch { channel, on },
        };
        ActuatorCall::new(self.machine.axis(), action)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ControlKernel {
    sweep_speed: u8,
    acknowledge: bool,
    bank: ActuatorBank,
    drivetrain: Mutex<Drivetrain>,
    joints: BTreeMap<Axis, Mutex<JointSlot>>,
    channels: BTreeMap<Axis, u8>,
    toggles: BTreeMap<Axis, Mutex<ToggleSlot>>,
    interlock: Arc<AtomicBool>,
    eco: AtomicBool,
    camera_hq: AtomicBool,
    color_target: Mutex<Option<[u8; 3]>>,
    trims: Option<Arc<dyn TrimStore>>,
    board: AxisBoard,
}

impl ControlKernel {
    pub fn new(config: KernelConfig, bank: ActuatorBank) -> Self {
        let interlock = Arc::new(AtomicBool::new(false));
        let joints = config
            .joints
            .iter()
            .map(|j| {
                let machine = match j.axis {
                    Axis::Shoulder => AxisMachine::with_lock(j.axis, Arc::clone(&interlock)),
                    axis => AxisMachine::new(axis),
                };
                (
                    j.axis,
                    Mutex::new(JointSlot {
                        machine,
                        channel: j.channel,
                        home_angle: clamp_angle(j.home_angle),
                    }),
                )
            })
            .collect();
        let channels = config.joints.iter().map(|j| (j.axis, j.channel)).collect();
        let toggles = std::iter::once((Axis::Headlight, config.headlight_channel))
            .chain(Axis::SWITCHES.into_iter().zip(1u8..))
            .map(|(axis, channel)| {
                (
                    axis,
                    Mutex::new(ToggleSlot {
                        machine: AxisMachine::new(axis),
                        channel,
                    }),
                )
            })
            .collect();
        let bank = if config.accel_limit > 0.0 {
            bank.with_ramp(config.accel_limit)
        } else {
            bank
        };
        Self {
            sweep_speed: config.sweep_speed,
            acknowledge: config.acknowledge,
            bank,
            drivetrain: Mutex::new(Drivetrain::new(config.default_speed)),
            joints,
            channels,
            toggles,
            interlock,
            eco: AtomicBool::new(false),
            camera_hq: AtomicBool::new(false),
            color_target: Mutex::new(None),
            trims: None,
            board: AxisBoard::new(),
        }
    }

    /// Persist saved trims through `store`. Without one, `PWMMS` and
    /// `PWMD` only change the init angles in memory.
    pub fn with_trim_store(mut self, store: Arc<dyn TrimStore>) -> Self {
        self.trims = Some(store);
        self
    }

    /// Execute one command. Returns the number of hardware calls issued.
    ///
    /// # Errors
    ///
    /// - [`RoverError::InterlockBlocked`] for shoulder raising while locked.
    /// - [`RoverError::HardwareFault`] when a driver call fails. The axis is
    ///   forced idle and a neutral call is attempted before returning.
    /// - [`RoverError::Persistence`] when a trim cannot be saved.
    #[instrument(skip(self), level = "debug")]
    pub fn execute(&self, command: &Command) -> Result<usize, RoverError> {
        let now = Utc::now();
        let result = match command {
            Command::Move {
                axis: axis @ (Axis::Drive | Axis::Turn),
                direction,
            } => self.drive(*axis, Some(*direction), now),
            Command::Stop {
                axis: axis @ (Axis::Drive | Axis::Turn),
            } => self.drive(*axis, None, now),
            Command::Move { axis, .. } if axis.is_toggle() => Err(RoverError::Parse(format!(
                "{axis} can only be switched on or off"
            ))),
            Command::Stop { axis } if axis.is_toggle() => self.toggle(*axis, false, now),
            Command::Move { axis, direction } => self.joint(*axis, Some(*direction), now),
            Command::Stop { axis } => self.joint(*axis, None, now),
            Command::Headlight { on } => self.toggle(Axis::Headlight, *on, now),
            Command::Switch { axis, on } => self.toggle(*axis, *on, now),
            Command::SetSpeed { speed } => {
                lock(&self.drivetrain).set_speed(*speed);
                Ok(0)
            }
            Command::SetMode { mode } => {
                lock(&self.drivetrain).set_mode(*mode);
                self.eco.store(*mode == PowerMode::Eco, Ordering::Release);
                info!(?mode, "power mode changed");
                Ok(0)
            }
            Command::CameraQuality { high } => {
                self.camera_hq.store(*high, Ordering::Release);
                Ok(0)
            }
            Command::FindColor { hsv } => {
                *lock(&self.color_target) = Some(*hsv);
                Ok(0)
            }
            Command::Home => self.home(),
            Command::StopAll => self.stop_all(),
            Command::GetInfo => Ok(0),
            Command::TrimServo { channel, delta } => self.trim(*channel, *delta, now),
            Command::SaveTrim { channel } => self.save_trim(*channel, now),
            Command::ServoInit => self.servo_init(),
            Command::ResetTrim => self.reset_trims(),
        };
        if result.is_ok() && self.acknowledge {
            if let Some(pattern) = acknowledgement(command) {
                self.beep(pattern);
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Axis slots
    // ------------------------------------------------------------------

    fn drive(
        &self,
        axis: Axis,
        direction: Option<Direction>,
        now: DateTime<Utc>,
    ) -> Result<usize, RoverError> {
        let mut dt = lock(&self.drivetrain);
        let result = match dt.command(axis, direction, now)? {
            Some(call) => self.bank.apply(&call).map(|()| 1),
            None => Ok(0),
        };
        let result = result.map_err(|e| {
            dt.force_idle(now);
            self.attempt_halt();
            fault(axis, None, e)
        });
        self.publish_drivetrain(&dt);
        result
    }

    fn joint(
        &self,
        axis: Axis,
        direction: Option<Direction>,
        now: DateTime<Utc>,
    ) -> Result<usize, RoverError> {
        let slot = self.joint_slot(axis)?;
        let mut slot = lock(slot);
        let channel = slot.channel;
        let transition = match direction {
            Some(direction) => slot.machine.request_move(direction, now)?,
            None => slot.machine.request_stop(now),
        };
        let result = match (transition, direction) {
            (Transition::Unchanged, _) => Ok(0),
            (Transition::Actuate, Some(direction)) => self
                .bank
                .apply(&ActuatorCall::new(
                    axis,
                    ActuatorAction::Sweep {
                        channel,
                        direction,
                        speed: self.sweep_speed,
                    },
                ))
                .map(|()| 1),
            (Transition::Actuate, None) => self
                .bank
                .apply(&ActuatorCall::new(axis, ActuatorAction::Hold { channel }))
                .map(|()| 1),
        };
        let result = result.map_err(|e| {
            slot.machine.force_idle(now);
            self.attempt_safe_stop(&ActuatorCall::new(axis, ActuatorAction::Hold { channel }));
            fault(axis, Some(channel), e)
        });
        self.board.publish(&slot.machine);
        result
    }

    fn toggle(&self, axis: Axis, on: bool, now: DateTime<Utc>) -> Result<usize, RoverError> {
        let slot = self
            .toggles
            .get(&axis)
            .ok_or_else(|| RoverError::Parse(format!("{axis} is not an on/off output")))?;
        let mut slot = lock(slot);
        let result = match slot.machine.request_switch(on, now) {
            Transition::Unchanged => Ok(0),
            Transition::Actuate => self.bank.apply(&slot.call(on)).map(|()| 1),
        };
        let result = result.map_err(|e| {
            slot.machine.force_idle(now);
            fault(axis, Some(slot.channel), e)
        });
        self.board.publish(&slot.machine);
        result
    }

    fn joint_slot(&self, axis: Axis) -> Result<&Mutex<JointSlot>, RoverError> {
        self.joints.get(&axis).ok_or_else(|| RoverError::HardwareFault {
            component: axis.to_string(),
            details: "axis has no servo channel configured".into(),
        })
    }

    /// Joint wired to servo `channel`.
    fn joint_on(&self, channel: u8) -> Result<(Axis, &Mutex<JointSlot>), RoverError> {
        self.channels
            .iter()
            .find(|(_, ch)| **ch == channel)
            .and_then(|(axis, _)| self.joints.get(axis).map(|slot| (*axis, slot)))
            .ok_or_else(|| RoverError::Parse(format!("no joint on servo channel {channel}")))
    }

    /// Force a joint idle and move it to its home angle.
    fn move_home(
        &self,
        axis: Axis,
        slot: &mut JointSlot,
        now: DateTime<Utc>,
    ) -> Result<usize, RoverError> {
        slot.machine.force_idle(now);
        let channel = slot.channel;
        let result = self
            .bank
            .apply(&ActuatorCall::new(
                axis,
                ActuatorAction::SetAngle {
                    channel,
                    angle: slot.home_angle,
                },
            ))
            .map(|()| 1)
            .map_err(|e| fault(axis, Some(channel), e));
        self.board.publish(&slot.machine);
        result
    }

    fn attempt_safe_stop(&self, call: &ActuatorCall) {
        if let Err(e) = self.bank.apply(call) {
            warn!(axis = %call.axis, channel = ?call.channel(), error = %e, "safe stop failed");
        }
    }

    fn attempt_halt(&self) {
        if let Err(e) = self.bank.halt_tracks() {
            warn!(error = %e, "track halt failed");
        }
    }

    fn beep(&self, pattern: BeepPattern) {
        if let Err(e) = self.bank.beep(pattern) {
            debug!(?pattern, error = %e, "buzzer failed");
        }
    }

    fn publish_drivetrain(&self, dt: &Drivetrain) {
        for axis in [Axis::Drive, Axis::Turn] {
            if let Some(machine) = dt.machine(axis) {
                self.board.publish(machine);
            }
        }
    }

    // ------------------------------------------------------------------
    // Whole-rover operations
    // ------------------------------------------------------------------

    /// Stop every motion axis. The tracks stop at once, bypassing the ramp.
    /// Every axis is attempted even when an earlier one faults; the first
    /// fault is returned.
    pub fn stop_all(&self) -> Result<usize, RoverError> {
        let now = Utc::now();
        let mut issued = 0;
        let mut first_err = None;

        if let Err(e) = self.halt_drivetrain(now, &mut issued) {
            first_err = Some(e);
        }

        for axis in self.joints.keys().copied() {
            match self.joint(axis, None, now) {
                Ok(n) => issued += n,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(issued),
        }
    }

    /// Stop the tracks and return every joint to its home angle. The
    /// shoulder homes to its calibrated base angle.
    pub fn home(&self) -> Result<usize, RoverError> {
        let now = Utc::now();
        let mut issued = 0;
        let drivetrain = self.halt_drivetrain(now, &mut issued);
        let joints = self.home_joints(now, &mut issued);
        drivetrain.and(joints).map(|()| issued)
    }

    /// Move every joint to its init angle without touching the tracks.
    pub fn servo_init(&self) -> Result<usize, RoverError> {
        let mut issued = 0;
        self.home_joints(Utc::now(), &mut issued).map(|()| issued)
    }

    fn halt_drivetrain(&self, now: DateTime<Utc>, issued: &mut usize) -> Result<(), RoverError> {
        let mut dt = lock(&self.drivetrain);
        let moving = dt.stop_all(now).is_some();
        let mut result = Ok(());
        if moving || self.bank.is_ramped() {
            match self.bank.halt_tracks() {
                Ok(()) => *issued += 1,
                Err(e) => {
                    dt.force_idle(now);
                    result = Err(fault(Axis::Drive, None, e));
                }
            }
        }
        self.publish_drivetrain(&dt);
        result
    }

    fn home_joints(&self, now: DateTime<Utc>, issued: &mut usize) -> Result<(), RoverError> {
        let mut first_err = None;
        for (axis, slot) in &self.joints {
            match self.move_home(*axis, &mut lock(slot), now) {
                Ok(n) => *issued += n,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Advance the track ramp by `dt`. A write failure stops the drivetrain.
    pub fn ramp_step(&self, dt: Duration) -> Result<bool, RoverError> {
        self.bank.ramp_step(dt).map_err(|e| {
            let now = Utc::now();
            let mut drivetrain = lock(&self.drivetrain);
            drivetrain.force_idle(now);
            self.attempt_halt();
            self.publish_drivetrain(&drivetrain);
            fault(Axis::Drive, None, e)
        })
    }

    pub fn is_ramped(&self) -> bool {
        self.bank.is_ramped()
    }

    /// Play `pattern` on the buzzer. Failures are only logged.
    pub fn announce(&self, pattern: BeepPattern) {
        self.beep(pattern);
    }

    // ------------------------------------------------------------------
    // Trims
    // ------------------------------------------------------------------

    fn trim(&self, channel: u8, delta: i8, now: DateTime<Utc>) -> Result<usize, RoverError> {
        let (axis, slot) = self.joint_on(channel)?;
        let mut slot = lock(slot);
        slot.home_angle = clamp_angle(slot.home_angle + f32::from(delta));
        debug!(axis = %axis, channel, angle = slot.home_angle, "init angle trimmed");
        self.move_home(axis, &mut slot, now)
    }

    fn save_trim(&self, channel: u8, now: DateTime<Utc>) -> Result<usize, RoverError> {
        let (axis, slot) = self.joint_on(channel)?;
        let mut slot = lock(slot);
        match &self.trims {
            Some(store) => store.save(channel, slot.home_angle)?,
            None => warn!(channel, "no trim store, init angle kept in memory only"),
        }
        info!(axis = %axis, channel, angle = slot.home_angle, "init angle saved");
        self.move_home(axis, &mut slot, now)
    }

    fn reset_trims(&self) -> Result<usize, RoverError> {
        let defaults: InitAngles = self
            .channels
            .values()
            .map(|channel| (*channel, DEFAULT_INIT_ANGLE))
            .collect();
        if let Some(store) = &self.trims {
            store.save_all(&defaults)?;
        }
        for slot in self.joints.values() {
            lock(slot).home_angle = DEFAULT_INIT_ANGLE;
        }
        info!("init angles reset");
        self.servo_init()
    }

    /// Current init angle of every joint, by servo channel.
    pub fn init_angles(&self) -> InitAngles {
        self.joints
            .values()
            .map(|slot| {
                let slot = lock(slot);
                (slot.channel, slot.home_angle)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Safety
    // ------------------------------------------------------------------

    /// Engage or release the low-voltage overlay on the shoulder.
    ///
    /// Only flips the shared flag, so it never waits behind an in-flight
    /// shoulder call. Returns `true` when the interlock has just engaged;
    /// the caller then runs [`hold_rising_shoulder`](Self::hold_rising_shoulder)
    /// off its own path.
    pub fn set_interlock(&self, engaged: bool) -> bool {
        let was = self.interlock.swap(engaged, Ordering::AcqRel);
        self.board.set_locked(Axis::Shoulder, engaged);
        if was != engaged {
            info!(engaged, "shoulder interlock overlay changed");
        }
        engaged && !was
    }

    /// Hold the shoulder if it is rising while locked. Returns `true` when a
    /// hold was issued. Waits for any in-flight shoulder call.
    #[instrument(skip(self))]
    pub fn hold_rising_shoulder(&self) -> Result<bool, RoverError> {
        let Some(slot) = self.joints.get(&Axis::Shoulder) else {
            return Ok(false);
        };
        let mut slot = lock(slot);
        if !slot.machine.locked() || slot.machine.state() != AxisState::MovingPositive {
            return Ok(false);
        }
        let channel = slot.channel;
        slot.machine.force_idle(Utc::now());
        let result = self
            .bank
            .apply(&ActuatorCall::new(
                Axis::Shoulder,
                ActuatorAction::Hold { channel },
            ))
            .map(|()| true)
            .map_err(|e| fault(Axis::Shoulder, Some(channel), e));
        self.board.publish(&slot.machine);
        result
    }

    /// Apply new shoulder travel limits and re-home the shoulder to the
    /// base angle.
    #[instrument(skip(self))]
    pub fn apply_shoulder_calibration(&self, cal: ShoulderCalibration) -> Result<(), RoverError> {
        let slot = self.joint_slot(Axis::Shoulder)?;
        let mut slot = lock(slot);
        let channel = slot.channel;
        let (min, max) = cal.travel();
        slot.home_angle = min;
        self.bank
            .set_servo_limits(channel, min, max)
            .map_err(|e| fault(Axis::Shoulder, Some(channel), e))?;
        self.move_home(Axis::Shoulder, &mut slot, Utc::now())
            .map(|_| ())
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// Shared flag mirrored by [`LowVoltageRule`][crate::gate::LowVoltageRule].
    pub fn interlock_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interlock)
    }

    pub fn interlock_engaged(&self) -> bool {
        self.interlock.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> PowerMode {
        if self.eco.load(Ordering::Acquire) {
            PowerMode::Eco
        } else {
            PowerMode::Active
        }
    }

    pub fn camera_hq(&self) -> bool {
        self.camera_hq.load(Ordering::Acquire)
    }

    pub fn color_target(&self) -> Option<[u8; 3]> {
        *lock(&self.color_target)
    }

    /// Last-known state of every axis. Never waits on a hardware call.
    pub fn axes(&self) -> Vec<AxisSnapshot> {
        self.board.snapshot()
    }

    pub fn axis(&self, axis: Axis) -> Option<AxisSnapshot> {
        self.board.get(axis)
    }

    /// Hardware channel owned by `axis`, if it owns a single one.
    pub fn channel_of(&self, axis: Axis) -> Option<u8> {
        match axis {
            Axis::Drive | Axis::Turn => None,
            toggle if toggle.is_toggle() => self.toggles.get(&toggle).map(|slot| lock(slot).channel),
            joint => self.channels.get(&joint).copied(),
        }
    }
}

/// Attach axis and channel context to a driver error.
fn fault(axis: Axis, channel: Option<u8>, err: RoverError) -> RoverError {
    let details = match err {
        RoverError::HardwareFault { details, .. } => details,
        other => other.to_string(),
    };
    let details = match channel {
        Some(channel) => format!("channel {channel}: {details}"),
        None => details,
    };
    RoverError::HardwareFault {
        component: axis.to_string(),
        details,
    }
}
