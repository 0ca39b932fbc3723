//! [`AxisBoard`] – last-known axis states for telemetry.
//!
//! Each state machine publishes its snapshot here after every transition.
//! Readers never touch the machines themselves, so building a telemetry
//! snapshot cannot wait behind an in-flight hardware call.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use rover_types::{Axis, AxisSnapshot};

use crate::axis::AxisMachine;

pub struct AxisBoard {
    cells: RwLock<BTreeMap<Axis, AxisSnapshot>>,
}

impl Default for AxisBoard {
    fn default() -> Self {
        let cells = Axis::ALL
            .into_iter()
            .map(|axis| (axis, AxisMachine::new(axis).snapshot()))
            .collect();
        Self {
            cells: RwLock::new(cells),
        }
    }
}

impl AxisBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, machine: &AxisMachine) {
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        cells.insert(machine.axis(), machine.snapshot());
    }

    /// Flip the `locked` overlay of one cell without a machine in hand.
    pub fn set_locked(&self, axis: Axis, locked: bool) {
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cell) = cells.get_mut(&axis) {
            cell.locked = locked;
        }
    }

    pub fn get(&self, axis: Axis) -> Option<AxisSnapshot> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.get(&axis).cloned()
    }

    /// All axes, in [`Axis`] order.
    pub fn snapshot(&self) -> Vec<AxisSnapshot> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rover_types::{AxisState, Direction};

    #[test]
    fn starts_with_every_axis_idle() {
        let board = AxisBoard::new();
        let snap = board.snapshot();
        assert_eq!(snap.len(), Axis::ALL.len());
        assert!(snap.iter().all(|s| s.state == AxisState::Idle));
        assert_eq!(snap[0].axis, Axis::Drive);
    }

    #[test]
    fn publish_replaces_the_axis_cell() {
        let board = AxisBoard::new();
        let mut m = AxisMachine::new(Axis::Yaw);
        m.request_move(Direction::Negative, Utc::now()).unwrap();
        board.publish(&m);
        assert_eq!(
            board.get(Axis::Yaw).unwrap().state,
            AxisState::MovingNegative
        );
    }

    #[test]
    fn locked_overlay_is_set_in_place() {
        let board = AxisBoard::new();
        board.set_locked(Axis::Shoulder, true);
        let cell = board.get(Axis::Shoulder).unwrap();
        assert!(cell.locked);
        assert_eq!(cell.state, AxisState::Idle);
    }
}
