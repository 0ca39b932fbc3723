//! Runtime tunables.
//!
//! The CLI maps its persisted TOML configuration onto [`RuntimeConfig`];
//! tests build one from [`Default`] and override the fields they care about.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rover_kernel::KernelConfig;
use rover_power::{FilterConfig, PercentageCurve};
use rover_types::{Axis, CalibrationRecord};
use zeroize::Zeroizing;

pub const DEFAULT_CREDENTIAL: &str = "admin:123456";

#[derive(Clone)]
pub struct RuntimeConfig {
    /// Shared secret a session must send as its first message.
    pub credential: Zeroizing<String>,
    pub calibration_path: PathBuf,
    pub shoulder_path: PathBuf,
    /// Joint init angles saved with `PWMMS`.
    pub trim_path: PathBuf,

    // Battery acquisition
    pub adc_channel: u8,
    /// Full-scale ADC counts of the battery divider.
    pub full_scale: u16,
    /// Volts the uncalibrated divider reports at full scale.
    pub nominal_volts: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub filter: FilterConfig,
    pub curve: PercentageCurve,
    pub stale_after_failures: u32,
    pub interlock_lower: f64,
    pub interlock_upper: f64,

    // Cadences
    pub acquisition_period: Duration,
    pub sensor_period: Duration,
    pub stats_period: Duration,
    /// Track ramp step. Only used when `kernel.accel_limit` is positive.
    pub ramp_period: Duration,
    /// Periodic snapshot push; `None` pushes only on request.
    pub telemetry_interval: Option<Duration>,
    /// Battery estimate is marked stale after this long without a sample.
    pub stale_after: Duration,

    // Execution
    pub worker_count: usize,
    pub session_queue_depth: usize,

    // Sessions
    pub idle_timeout: Duration,
    pub write_deadline: Duration,

    // Push-on-change distance events
    pub distance_threshold_cm: f32,
    pub distance_min_interval: Duration,

    pub disabled_axes: Vec<Axis>,
    pub kernel: KernelConfig,
}

impl RuntimeConfig {
    /// Calibration used when no document exists yet.
    pub fn default_calibration(&self) -> CalibrationRecord {
        rover_power::nominal_record(
            self.full_scale,
            self.nominal_volts,
            self.min_voltage,
            self.max_voltage,
        )
    }

    /// Volts per count of the uncalibrated divider.
    pub fn nominal_scale(&self) -> f64 {
        self.nominal_volts / f64::from(self.full_scale.max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            credential: Zeroizing::new(DEFAULT_CREDENTIAL.to_string()),
            calibration_path: PathBuf::from("battery_calibration.json"),
            shoulder_path: PathBuf::from("servo_calibration.json"),
            trim_path: PathBuf::from("servo_trims.json"),
            adc_channel: 0,
            full_scale: u16::MAX,
            nominal_volts: 8.4,
            min_voltage: 6.8,
            max_voltage: 8.4,
            filter: FilterConfig::default(),
            curve: PercentageCurve::Linear,
            stale_after_failures: 5,
            interlock_lower: 6.8,
            interlock_upper: 7.0,
            acquisition_period: Duration::from_secs(1),
            sensor_period: Duration::from_millis(200),
            stats_period: Duration::from_secs(2),
            ramp_period: Duration::from_millis(20),
            telemetry_interval: Some(Duration::from_secs(2)),
            stale_after: Duration::from_secs(10),
            worker_count: 4,
            session_queue_depth: 32,
            idle_timeout: Duration::from_secs(300),
            write_deadline: Duration::from_secs(2),
            distance_threshold_cm: 1.0,
            distance_min_interval: Duration::from_millis(100),
            disabled_axes: Vec::new(),
            kernel: KernelConfig::default(),
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("credential", &"<redacted>")
            .field("calibration_path", &self.calibration_path)
            .field("shoulder_path", &self.shoulder_path)
            .field("trim_path", &self.trim_path)
            .field("adc_channel", &self.adc_channel)
            .field("interlock", &(self.interlock_lower, self.interlock_upper))
            .field("worker_count", &self.worker_count)
            .field("disabled_axes", &self.disabled_axes)
            .finish_non_exhaustive()
    }
}
