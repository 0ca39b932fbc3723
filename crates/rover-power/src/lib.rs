//! `rover-power` – battery estimation and persisted calibration.
//!
//! Raw ADC counts flow through [`monitor::BatteryMonitor`]: they are scaled
//! with the persisted [`rover_types::CalibrationRecord`], smoothed by
//! [`filter::VoltageFilter`], mapped to a percentage by
//! [`percent::PercentageCurve`], and published on a watch channel.
//!
//! The shoulder travel limits and the joint init angles are persisted next
//! to the battery calibration.

pub mod calibration;
pub mod filter;
pub mod monitor;
pub mod percent;
pub mod persist;
pub mod shoulder;
pub mod trims;

pub use calibration::{CalibrationStore, nominal_record};
pub use filter::{FilterConfig, VoltageFilter};
pub use monitor::{BatteryMonitor, CalibrationOutcome, MonitorConfig, significant_change};
pub use percent::PercentageCurve;
pub use shoulder::ShoulderCalibrationStore;
pub use trims::ServoTrimStore;
