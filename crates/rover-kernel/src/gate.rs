//! [`CommandGate`] – synchronous pre-dispatch rule check.
//!
//! The dispatcher passes every decoded [`Command`] through
//! [`CommandGate::verify`] before queueing it. Rules are evaluated in
//! insertion order and the first violation is returned to the operator
//! immediately, so a refusal never waits behind queued work. The state
//! machines re-check the same conditions at execution time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rover_types::{Axis, Command, Direction, RoverError};

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single condition a command must satisfy before it is queued.
pub trait Rule: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    fn check(&self, command: &Command) -> Result<(), RoverError>;
}

// ────────────────────────────────────────────────────────────────────────────
// CommandGate
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::AtomicBool;
/// use rover_kernel::gate::{CommandGate, LowVoltageRule};
/// use rover_types::{Axis, Command, Direction};
///
/// let engaged = Arc::new(AtomicBool::new(true));
/// let mut gate = CommandGate::new();
/// gate.add_rule(Box::new(LowVoltageRule::new(engaged)));
///
/// let raise = Command::Move { axis: Axis::Shoulder, direction: Direction::Positive };
/// assert!(gate.verify(&raise).is_err());
/// let lower = Command::Move { axis: Axis::Shoulder, direction: Direction::Negative };
/// assert!(gate.verify(&lower).is_ok());
/// ```
#[derive(Default)]
pub struct CommandGate {
    rules: Vec<Box<dyn Rule>>,
}

impl CommandGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Check `command` against every rule; returns the first violation.
    pub fn verify(&self, command: &Command) -> Result<(), RoverError> {
        for rule in &self.rules {
            if let Err(e) = rule.check(command) {
                tracing::debug!(rule = rule.name(), error = %e, "command refused");
                return Err(e);
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Refuses raising the shoulder while the low-voltage interlock is engaged.
pub struct LowVoltageRule {
    engaged: Arc<AtomicBool>,
}

impl LowVoltageRule {
    pub fn new(engaged: Arc<AtomicBool>) -> Self {
        Self { engaged }
    }
}

impl Rule for LowVoltageRule {
    fn name(&self) -> &str {
        "low_voltage"
    }

    fn check(&self, command: &Command) -> Result<(), RoverError> {
        if let Command::Move {
            axis: Axis::Shoulder,
            direction: Direction::Positive,
        } = command
        {
            if self.engaged.load(Ordering::Acquire) {
                return Err(RoverError::InterlockBlocked {
                    axis: Axis::Shoulder,
                });
            }
        }
        Ok(())
    }
}

/// Refuses any command that would move a disabled axis.
pub struct DisabledAxesRule {
    pub axes: Vec<Axis>,
}

impl Rule for DisabledAxesRule {
    fn name(&self) -> &str {
        "disabled_axes"
    }

    fn check(&self, command: &Command) -> Result<(), RoverError> {
        match command {
            Command::Move { axis, .. } | Command::Switch { axis, on: true }
                if self.axes.contains(axis) =>
            {
                Err(RoverError::HardwareFault {
                    component: axis.to_string(),
                    details: "axis is disabled".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}
