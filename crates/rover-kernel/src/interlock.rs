//! [`Interlock`] – low-voltage cutoff with hysteresis.
//!
//! The interlock engages when the smoothed battery voltage falls to or below
//! `lower` and only releases once it climbs back to or above `upper`.
//! Voltages inside the band never change the state.

use rover_types::RoverError;

/// Default width of the hysteresis band in volts.
pub const DEFAULT_BAND: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct Interlock {
    engaged: bool,
    lower: f64,
    upper: f64,
}

impl Interlock {
    /// # Errors
    ///
    /// [`RoverError::InvalidCalibration`] unless `lower < upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self, RoverError> {
        if !(lower.is_finite() && upper.is_finite() && lower < upper) {
            return Err(RoverError::InvalidCalibration(format!(
                "interlock lower threshold {lower} must be below upper threshold {upper}"
            )));
        }
        Ok(Self {
            engaged: false,
            lower,
            upper,
        })
    }

    /// Interlock whose band sits just above `min_voltage`: it engages at
    /// `min_voltage` and releases at `min_voltage + DEFAULT_BAND`.
    pub fn above(min_voltage: f64) -> Result<Self, RoverError> {
        Self::new(min_voltage, min_voltage + DEFAULT_BAND)
    }

    pub fn engaged(&self) -> bool {
        self.engaged
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Feed one smoothed voltage. Returns the new state on a transition.
    pub fn evaluate(&mut self, voltage: f64) -> Option<bool> {
        let next = if self.engaged {
            voltage < self.upper
        } else {
            voltage <= self.lower
        };
        if next == self.engaged {
            return None;
        }
        self.engaged = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_band() {
        assert!(Interlock::new(7.0, 6.8).is_err());
        assert!(Interlock::new(7.0, 7.0).is_err());
        assert!(Interlock::new(f64::NAN, 7.0).is_err());
    }

    #[test]
    fn engages_at_lower_threshold() {
        let mut il = Interlock::new(6.6, 6.8).unwrap();
        assert_eq!(il.evaluate(7.5), None);
        assert_eq!(il.evaluate(6.61), None);
        assert_eq!(il.evaluate(6.6), Some(true));
        assert!(il.engaged());
    }

    #[test]
    fn oscillation_inside_band_does_not_chatter() {
        let mut il = Interlock::new(6.6, 6.8).unwrap();
        il.evaluate(6.5);
        for v in [6.65, 6.79, 6.61, 6.7, 6.599, 6.75, 6.62] {
            assert_eq!(il.evaluate(v), None, "voltage {v} must not toggle");
            assert!(il.engaged());
        }
    }

    #[test]
    fn releases_only_at_upper_threshold() {
        let mut il = Interlock::new(6.6, 6.8).unwrap();
        il.evaluate(6.4);
        assert_eq!(il.evaluate(6.79), None);
        assert_eq!(il.evaluate(6.8), Some(false));
        assert!(!il.engaged());
        // Falling back into the band does not re-engage.
        assert_eq!(il.evaluate(6.7), None);
    }

    #[test]
    fn above_builds_default_band() {
        let il = Interlock::above(6.8).unwrap();
        let (lower, upper) = il.thresholds();
        assert!((lower - 6.8).abs() < 1e-9);
        assert!((upper - 7.0).abs() < 1e-9);
    }
}
