use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Axes
// ────────────────────────────────────────────────────────────────────────────

/// One independently controllable degree of freedom of the rover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Forward/backward track motion.
    Drive,
    /// Left/right track motion, overlapping with [`Axis::Drive`].
    Turn,
    /// Arm shoulder joint. Subject to the low-voltage interlock.
    Shoulder,
    /// Arm wrist ("hand") joint.
    Wrist,
    /// Arm yaw (look left/right) joint.
    Yaw,
    /// Gripper jaw.
    Gripper,
    /// Camera tilt servo.
    CameraTilt,
    /// Headlight LED.
    Headlight,
    /// Auxiliary GPIO switch outputs.
    Switch1,
    Switch2,
    Switch3,
}

impl Axis {
    pub const ALL: [Axis; 11] = [
        Axis::Drive,
        Axis::Turn,
        Axis::Shoulder,
        Axis::Wrist,
        Axis::Yaw,
        Axis::Gripper,
        Axis::CameraTilt,
        Axis::Headlight,
        Axis::Switch1,
        Axis::Switch2,
        Axis::Switch3,
    ];

    /// Servo-driven axes, in servo channel order.
    pub const JOINTS: [Axis; 5] = [
        Axis::Shoulder,
        Axis::Wrist,
        Axis::Yaw,
        Axis::Gripper,
        Axis::CameraTilt,
    ];

    /// GPIO switch outputs, in switch number order (1, 2, 3).
    pub const SWITCHES: [Axis; 3] = [Axis::Switch1, Axis::Switch2, Axis::Switch3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Drive => "drive",
            Axis::Turn => "turn",
            Axis::Shoulder => "shoulder",
            Axis::Wrist => "wrist",
            Axis::Yaw => "yaw",
            Axis::Gripper => "gripper",
            Axis::CameraTilt => "camera_tilt",
            Axis::Headlight => "headlight",
            Axis::Switch1 => "switch_1",
            Axis::Switch2 => "switch_2",
            Axis::Switch3 => "switch_3",
        }
    }

    /// `true` for servo-driven arm/camera joints.
    pub fn is_joint(&self) -> bool {
        Self::JOINTS.contains(self)
    }

    /// `true` for on/off outputs: the headlight and the GPIO switches.
    pub fn is_toggle(&self) -> bool {
        *self == Axis::Headlight || Self::SWITCHES.contains(self)
    }

    /// Switch axis for a 1-based switch number.
    pub fn switch(number: u8) -> Option<Axis> {
        Self::SWITCHES.get(usize::from(number).checked_sub(1)?).copied()
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a move command along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn sign(self) -> i8 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }
}

/// Discrete state of an axis state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisState {
    Idle,
    MovingPositive,
    MovingNegative,
    /// Headlight or switch output on. Never used by motion axes.
    On,
}

impl AxisState {
    pub fn moving(direction: Direction) -> Self {
        match direction {
            Direction::Positive => AxisState::MovingPositive,
            Direction::Negative => AxisState::MovingNegative,
        }
    }

    /// Signed motion of the state: `1`, `-1`, or `0`.
    pub fn sign(self) -> i8 {
        match self {
            AxisState::MovingPositive => 1,
            AxisState::MovingNegative => -1,
            AxisState::Idle | AxisState::On => 0,
        }
    }

    /// Operator-facing label. Arm joints move up/down, everything else
    /// moves positive/negative.
    pub fn label(self, axis: Axis) -> &'static str {
        match (self, axis.is_joint()) {
            (AxisState::Idle, _) => "idle",
            (AxisState::On, _) => "on",
            (AxisState::MovingPositive, true) => "moving_up",
            (AxisState::MovingNegative, true) => "moving_down",
            (AxisState::MovingPositive, false) => "moving_positive",
            (AxisState::MovingNegative, false) => "moving_negative",
        }
    }
}

/// Power profile selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    #[default]
    Active,
    /// Drive duty is capped at half of the requested speed.
    Eco,
}

// ────────────────────────────────────────────────────────────────────────────
// Commands and actuator calls
// ────────────────────────────────────────────────────────────────────────────

/// Closed operator command vocabulary, decoded once at the transport
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    /// Start moving `axis` in `direction`.
    Move { axis: Axis, direction: Direction },
    /// Stop `axis` and bring it to a neutral output.
    Stop { axis: Axis },
    /// Switch the headlight.
    Headlight { on: bool },
    /// Switch one of the GPIO outputs in [`Axis::SWITCHES`].
    Switch { axis: Axis, on: bool },
    /// Drive speed in percent, consulted by the next drive/turn move.
    SetSpeed { speed: u8 },
    SetMode { mode: PowerMode },
    CameraQuality { high: bool },
    /// HSV colour target for the vision collaborator.
    FindColor { hsv: [u8; 3] },
    /// Return every joint to its home angle and stop the tracks.
    Home,
    /// Stop every axis.
    StopAll,
    /// Request an immediate telemetry snapshot.
    GetInfo,
    /// Nudge the init angle of the joint on servo `channel` by `delta`
    /// degrees and move the joint there.
    TrimServo { channel: u8, delta: i8 },
    /// Persist the current init angle of the joint on servo `channel` and
    /// move the joint there.
    SaveTrim { channel: u8 },
    /// Move every joint to its init angle. The tracks are left alone.
    ServoInit,
    /// Reset every init angle to the default, persist, and move there.
    ResetTrim,
}

impl Command {
    /// The axis this command affects, when it affects exactly one.
    pub fn axis(&self) -> Option<Axis> {
        match self {
            Command::Move { axis, .. } | Command::Stop { axis } => Some(*axis),
            Command::Headlight { .. } => Some(Axis::Headlight),
            Command::Switch { axis, .. } => Some(*axis),
            _ => None,
        }
    }

    /// `true` when executing the command touches actuator hardware.
    pub fn is_actuation(&self) -> bool {
        matches!(
            self,
            Command::Move { .. }
                | Command::Stop { .. }
                | Command::Headlight { .. }
                | Command::Switch { .. }
                | Command::Home
                | Command::StopAll
                | Command::TrimServo { .. }
                | Command::SaveTrim { .. }
                | Command::ServoInit
                | Command::ResetTrim
        )
    }
}

/// Hardware-level action issued by a state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum ActuatorAction {
    /// Drive both tracks from the combined drive (`linear`) and turn
    /// (`angular`) states, each in `-1..=1`, at `duty` percent.
    Tracks { linear: i8, angular: i8, duty: u8 },
    /// Sweep a servo continuously until it is held.
    Sweep {
        channel: u8,
        direction: Direction,
        speed: u8,
    },
    /// Stop a sweeping servo at its current angle.
    Hold { channel: u8 },
    /// Move a servo to an absolute angle in degrees.
    SetAngle { channel: u8, angle: f32 },
    /// Switch a light channel.
    Light { channel: u8, on: bool },
    /// Switch a GPIO output.
    Switch { channel: u8, on: bool },
}

/// One call against actuator hardware, attributed to the axis that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCall {
    pub axis: Axis,
    pub action: ActuatorAction,
}

impl ActuatorCall {
    pub fn new(axis: Axis, action: ActuatorAction) -> Self {
        Self { axis, action }
    }

    /// Hardware channel addressed by the call, if it addresses only one.
    pub fn channel(&self) -> Option<u8> {
        match self.action {
            ActuatorAction::Tracks { .. } => None,
            ActuatorAction::Sweep { channel, .. }
            | ActuatorAction::Hold { channel }
            | ActuatorAction::SetAngle { channel, .. }
            | ActuatorAction::Light { channel, .. }
            | ActuatorAction::Switch { channel, .. } => Some(channel),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Telemetry records
// ────────────────────────────────────────────────────────────────────────────

/// Smoothed battery state published after every acquisition tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryEstimate {
    /// Smoothed, calibrated battery voltage.
    pub voltage: f64,
    /// Smoothed voltage converted with the nominal (uncalibrated) scale.
    pub raw_voltage: f64,
    /// Battery percentage. `None` while the estimate is stale.
    pub percentage: Option<u8>,
    /// Set when the ADC has been unreachable for too long.
    pub stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for BatteryEstimate {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            raw_voltage: 0.0,
            percentage: None,
            stale: true,
            updated_at: None,
        }
    }
}

/// One IMU sample. Acceleration in g, angular rate in degrees per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuReading {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub temperature_c: f32,
}

/// Host health figures.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuStats {
    pub temperature_c: Option<f32>,
    pub usage_percent: f32,
    pub ram_percent: f32,
}

/// Published view of one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSnapshot {
    pub axis: Axis,
    pub state: AxisState,
    pub label: String,
    /// Shoulder only: motion restricted by the low-voltage interlock.
    pub locked: bool,
    pub last_command_at: Option<DateTime<Utc>>,
}

/// Everything the telemetry broadcaster pushes to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuStats,
    pub battery: BatteryEstimate,
    pub imu: Option<ImuReading>,
    pub distance_cm: Option<f32>,
    pub mode: PowerMode,
    pub camera_hq: bool,
    pub interlock_engaged: bool,
    pub axes: Vec<AxisSnapshot>,
}

// ────────────────────────────────────────────────────────────────────────────
// Calibration records
// ────────────────────────────────────────────────────────────────────────────

/// Persisted battery conversion parameters.
///
/// `volts = raw_counts * scale + offset`. `revision` increases by exactly
/// one on every committed update and acts as an ETag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
    #[serde(default)]
    pub revision: u64,
}

impl CalibrationRecord {
    /// Check the record invariants: `scale > 0` and `min < max`.
    pub fn validate(&self) -> Result<(), RoverError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(RoverError::InvalidCalibration(format!(
                "scale must be positive, got {}",
                self.scale
            )));
        }
        if !self.offset.is_finite() {
            return Err(RoverError::InvalidCalibration("offset must be finite".into()));
        }
        if !(self.min_voltage < self.max_voltage) {
            return Err(RoverError::InvalidCalibration(format!(
                "min_voltage {} must be below max_voltage {}",
                self.min_voltage, self.max_voltage
            )));
        }
        Ok(())
    }
}

/// Response shape of the calibration surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationView {
    pub voltage: f64,
    pub raw_voltage: f64,
    pub calibration: CalibrationRecord,
    pub revision: u64,
}

/// Shoulder servo calibration: `base_angle` is absolute, `raise_angle` is
/// added on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShoulderCalibration {
    pub base_angle: f32,
    pub raise_angle: f32,
}

impl ShoulderCalibration {
    pub const MIN_RAISE: f32 = 5.0;
    pub const MAX_ANGLE: f32 = 180.0;

    /// Clamp both angles into range: base to `0..=180`, raise to `5..=180`.
    pub fn clamped(self) -> Self {
        Self {
            base_angle: self.base_angle.clamp(0.0, Self::MAX_ANGLE),
            raise_angle: self.raise_angle.clamp(Self::MIN_RAISE, Self::MAX_ANGLE),
        }
    }

    /// Travel limits `(min, max)` of the shoulder servo in degrees.
    pub fn travel(&self) -> (f32, f32) {
        let min = self.base_angle.clamp(0.0, Self::MAX_ANGLE);
        let max = (self.base_angle + self.raise_angle).clamp(min, Self::MAX_ANGLE);
        (min, max)
    }
}

impl Default for ShoulderCalibration {
    fn default() -> Self {
        Self {
            base_angle: 90.0,
            raise_angle: 60.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "rover-runtime::acquisition"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data pushed to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    BatteryStatus(BatteryEstimate),
    BatteryCalibration(CalibrationRecord),
    DistanceUpdate { distance_cm: f32 },
    SafetyInterlock { engaged: bool, voltage: f64 },
    ShoulderCalibration(ShoulderCalibration),
    HardwareFault {
        axis: Axis,
        channel: Option<u8>,
        message: String,
    },
    /// A queued command failed after its `queued` reply was sent. Only
    /// the session that sent it is told.
    CommandRejected {
        session: Uuid,
        command: Command,
        error: RoverError,
    },
    Telemetry(TelemetrySnapshot),
}

impl EventPayload {
    /// Wire name of the event, as used by SSE `event:` lines.
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::BatteryStatus(_) => "battery_status",
            EventPayload::BatteryCalibration(_) => "battery_calibration",
            EventPayload::DistanceUpdate { .. } => "distance_update",
            EventPayload::SafetyInterlock { .. } => "safety_interlock",
            EventPayload::ShoulderCalibration(_) => "shoulder_calibration",
            EventPayload::HardwareFault { .. } => "hardware_fault",
            EventPayload::CommandRejected { .. } => "command_rejected",
            EventPayload::Telemetry(_) => "telemetry",
        }
    }

    /// Session the event is addressed to. `None` for broadcast events.
    pub fn session(&self) -> Option<Uuid> {
        match self {
            EventPayload::CommandRejected { session, .. } => Some(*session),
            _ => None,
        }
    }

    /// Whether a subscriber belonging to `session` should see this event.
    /// Subscribers without a session only see broadcast events.
    pub fn visible_to(&self, session: Option<Uuid>) -> bool {
        self.session().is_none_or(|target| Some(target) == session)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by every rover crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RoverError {
    #[error("authentication failed")]
    Auth,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{axis} motion blocked by low-voltage interlock")]
    InterlockBlocked { axis: Axis },

    #[error("stale revision {expected}, current revision is {current}")]
    StaleRevision { expected: u64, current: u64 },

    #[error("hardware fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("battery acquisition unavailable: {0}")]
    AcquisitionUnavailable(String),
}

impl RoverError {
    /// Short machine-readable kind, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            RoverError::Auth => "auth",
            RoverError::Parse(_) => "parse",
            RoverError::InterlockBlocked { .. } => "interlock_blocked",
            RoverError::StaleRevision { .. } => "stale_revision",
            RoverError::HardwareFault { .. } => "hardware_fault",
            RoverError::InvalidCalibration(_) => "invalid_calibration",
            RoverError::Persistence(_) => "persistence",
            RoverError::Channel(_) => "channel",
            RoverError::Busy(_) => "busy",
            RoverError::AcquisitionUnavailable(_) => "acquisition_unavailable",
        }
    }

    /// HTTP status used by the REST surface.
    pub fn http_status(&self) -> u16 {
        match self {
            RoverError::Auth => 401,
            RoverError::Parse(_) | RoverError::InvalidCalibration(_) => 400,
            RoverError::InterlockBlocked { .. } | RoverError::StaleRevision { .. } => 409,
            RoverError::Busy(_) | RoverError::AcquisitionUnavailable(_) => 503,
            RoverError::HardwareFault { .. }
            | RoverError::Persistence(_)
            | RoverError::Channel(_) => 500,
        }
    }
}
