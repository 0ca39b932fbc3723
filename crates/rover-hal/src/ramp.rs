//! [`TrackRamp`] – acceleration limit on the track motors.
//!
//! Track commands only move the *target* speed. A periodic
//! [`step`](TrackRamp::step) slews the output towards it by at most
//! `accel_limit * dt` percent per track, so a forward command from rest
//! reaches full speed over `100 / accel_limit` seconds instead of at once.

use std::time::Duration;

/// Signed track speeds in percent, `[left, right]`, each in `-100..=100`.
pub type TrackSpeeds = [f32; 2];

#[derive(Debug, Clone)]
pub struct TrackRamp {
    accel_limit: f32,
    target: TrackSpeeds,
    current: TrackSpeeds,
}

impl TrackRamp {
    /// `accel_limit` is in percent of full speed per second.
    pub fn new(accel_limit: f32) -> Self {
        Self {
            accel_limit: accel_limit.max(0.0),
            target: [0.0; 2],
            current: [0.0; 2],
        }
    }

    pub fn set_target(&mut self, target: TrackSpeeds) {
        self.target = target.map(|s| s.clamp(-100.0, 100.0));
    }

    pub fn target(&self) -> TrackSpeeds {
        self.target
    }

    pub fn current(&self) -> TrackSpeeds {
        self.current
    }

    pub fn settled(&self) -> bool {
        self.current == self.target
    }

    /// Drop target and output to zero at once.
    pub fn halt(&mut self) {
        self.target = [0.0; 2];
        self.current = [0.0; 2];
    }

    /// Advance the output by `dt`. Returns the new output, or `None` when it
    /// already equals the target.
    pub fn step(&mut self, dt: Duration) -> Option<TrackSpeeds> {
        if self.settled() {
            return None;
        }
        let max_delta = self.accel_limit * dt.as_secs_f32();
        for (current, &target) in self.current.iter_mut().zip(&self.target) {
            *current = if target > *current + max_delta {
                *current + max_delta
            } else if target < *current - max_delta {
                *current - max_delta
            } else {
                target
            };
        }
        Some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    #[test]
    fn full_speed_is_reached_in_steps() {
        let mut ramp = TrackRamp::new(200.0);
        ramp.set_target([100.0, 100.0]);
        let outputs: Vec<f32> = std::iter::from_fn(|| ramp.step(TICK).map(|s| s[0])).collect();
        assert_eq!(outputs.len(), 5);
        assert!((outputs[0] - 20.0).abs() < 1e-3);
        assert!((outputs[4] - 100.0).abs() < 1e-3);
        assert!(ramp.settled());
        assert_eq!(ramp.step(TICK), None);
    }

    #[test]
    fn reversal_passes_through_zero() {
        let mut ramp = TrackRamp::new(500.0);
        ramp.set_target([50.0, -50.0]);
        ramp.step(TICK);
        ramp.set_target([-50.0, 50.0]);
        let next = ramp.step(TICK).unwrap();
        assert!(next[0].abs() < 1e-3);
        assert!(next[1].abs() < 1e-3);
    }

    #[test]
    fn small_changes_land_exactly_on_target() {
        let mut ramp = TrackRamp::new(200.0);
        ramp.set_target([5.0, 0.0]);
        assert_eq!(ramp.step(TICK), Some([5.0, 0.0]));
    }

    #[test]
    fn halt_zeroes_at_once() {
        let mut ramp = TrackRamp::new(200.0);
        ramp.set_target([100.0, 100.0]);
        ramp.step(TICK);
        ramp.halt();
        assert!(ramp.settled());
        assert_eq!(ramp.current(), [0.0, 0.0]);
    }

    #[test]
    fn targets_are_clamped() {
        let mut ramp = TrackRamp::new(200.0);
        ramp.set_target([250.0, -300.0]);
        assert_eq!(ramp.target(), [100.0, -100.0]);
    }
}
