//! `rover-kernel` – command execution and safety.
//!
//! # Modules
//!
//! - [`axis`] – [`AxisMachine`][axis::AxisMachine]: the per-axis discrete
//!   state machine, including the shoulder's `locked` overlay.
//! - [`drivetrain`] – [`Drivetrain`][drivetrain::Drivetrain]: the
//!   overlapping drive and turn axes sharing the track motors.
//! - [`interlock`] – [`Interlock`][interlock::Interlock]: low-voltage cutoff
//!   with a hysteresis band.
//! - [`gate`] – [`CommandGate`][gate::CommandGate]: rules checked
//!   synchronously before a command is queued.
//! - [`controller`] – [`ControlKernel`][controller::ControlKernel]: executes
//!   commands with per-axis locking and safe-stop on hardware faults.
//! - [`board`] – [`AxisBoard`][board::AxisBoard]: last-known axis states
//!   for telemetry.
//! - [`trim`] – joint init angles and the [`TrimStore`][trim::TrimStore]
//!   that persists them.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: keyed heartbeat
//!   deadlines.

pub mod axis;
pub mod board;
pub mod controller;
pub mod drivetrain;
pub mod gate;
pub mod interlock;
pub mod trim;
pub mod watchdog;

pub use axis::{AxisMachine, Transition};
pub use board::AxisBoard;
pub use controller::{ControlKernel, JointConfig, KernelConfig};
pub use drivetrain::Drivetrain;
pub use gate::{CommandGate, DisabledAxesRule, LowVoltageRule, Rule};
pub use interlock::Interlock;
pub use trim::{DEFAULT_INIT_ANGLE, InitAngles, TrimStore};
pub use watchdog::{ComponentHealth, Watchdog};
