//! Voltage to battery-percentage mapping.

use rover_types::CalibrationRecord;
use serde::{Deserialize, Serialize};

/// Open-circuit voltage per cell of a Li-ion cell against remaining charge,
/// highest voltage first.
const LIION_CELL_OCV: [(f64, u8); 11] = [
    (4.20, 100),
    (4.10, 90),
    (4.00, 80),
    (3.92, 70),
    (3.85, 60),
    (3.80, 50),
    (3.75, 40),
    (3.70, 30),
    (3.65, 20),
    (3.55, 10),
    (3.40, 0),
];

/// How a smoothed voltage becomes a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PercentageCurve {
    /// Clamped linear interpolation between the calibration record's
    /// `min_voltage` (0 %) and `max_voltage` (100 %).
    #[default]
    #[serde(rename = "linear")]
    Linear,
    /// Lookup table for a two-cell Li-ion pack.
    #[serde(rename = "ocv_2s_liion")]
    Ocv2sLiIon,
}

impl PercentageCurve {
    /// Map `voltage` to `0..=100`. Monotonic in `voltage` and clamped
    /// outside the curve's domain.
    pub fn percentage(&self, voltage: f64, calibration: &CalibrationRecord) -> u8 {
        if !voltage.is_finite() {
            return 0;
        }
        match self {
            PercentageCurve::Linear => {
                linear(voltage, calibration.min_voltage, calibration.max_voltage)
            }
            PercentageCurve::Ocv2sLiIon => table(voltage / 2.0, &LIION_CELL_OCV),
        }
    }
}

fn linear(voltage: f64, min: f64, max: f64) -> u8 {
    let span = max - min;
    if span.abs() < 1e-6 {
        return 0;
    }
    let ratio = ((voltage - min) / span).clamp(0.0, 1.0);
    (ratio * 100.0).round() as u8
}

fn table(voltage: f64, points: &[(f64, u8)]) -> u8 {
    let (Some(&(top_v, top_p)), Some(&(bottom_v, bottom_p))) = (points.first(), points.last())
    else {
        return 0;
    };
    if voltage >= top_v {
        return top_p;
    }
    if voltage <= bottom_v {
        return bottom_p;
    }
    for pair in points.windows(2) {
        let (hi_v, hi_p) = pair[0];
        let (lo_v, lo_p) = pair[1];
        if voltage <= hi_v && voltage >= lo_v {
            let t = (voltage - lo_v) / (hi_v - lo_v);
            let pct = f64::from(lo_p) + t * (f64::from(hi_p) - f64::from(lo_p));
            return pct.round().clamp(0.0, 100.0) as u8;
        }
    }
    bottom_p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cal(min: f64, max: f64) -> CalibrationRecord {
        CalibrationRecord {
            scale: 1.0,
            offset: 0.0,
            min_voltage: min,
            max_voltage: max,
            revision: 0,
        }
    }

    #[test]
    fn linear_endpoints_and_midpoint() {
        let c = cal(6.8, 8.4);
        let curve = PercentageCurve::Linear;
        assert_eq!(curve.percentage(6.8, &c), 0);
        assert_eq!(curve.percentage(8.4, &c), 100);
        assert_eq!(curve.percentage(7.6, &c), 50);
    }

    #[test]
    fn linear_clamps_outside_range() {
        let c = cal(6.8, 8.4);
        assert_eq!(PercentageCurve::Linear.percentage(3.0, &c), 0);
        assert_eq!(PercentageCurve::Linear.percentage(12.0, &c), 100);
        assert_eq!(PercentageCurve::Linear.percentage(f64::NAN, &c), 0);
    }

    #[test]
    fn degenerate_range_reports_zero() {
        assert_eq!(PercentageCurve::Linear.percentage(7.0, &cal(7.0, 7.0)), 0);
    }

    #[test]
    fn ocv_table_is_monotonic_and_clamped() {
        let c = cal(0.0, 1.0);
        let curve = PercentageCurve::Ocv2sLiIon;
        assert_eq!(curve.percentage(8.6, &c), 100);
        assert_eq!(curve.percentage(6.0, &c), 0);
        assert_eq!(curve.percentage(7.60, &c), 50);

        let mut prev = 0;
        let mut v = 6.5;
        while v <= 8.6 {
            let p = curve.percentage(v, &c);
            assert!(p >= prev, "percentage dropped at {v} V");
            prev = p;
            v += 0.01;
        }
    }

    #[test]
    fn curve_names_match_config_values() {
        let json = serde_json::to_string(&PercentageCurve::Ocv2sLiIon).unwrap();
        assert_eq!(json, "\"ocv_2s_liion\"");
        let back: PercentageCurve = serde_json::from_str("\"linear\"").unwrap();
        assert_eq!(back, PercentageCurve::Linear);
    }
}
