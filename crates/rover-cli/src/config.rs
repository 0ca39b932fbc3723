//! Configuration Vault – reads/writes `~/.rover/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_kernel::KernelConfig;
use rover_power::{FilterConfig, PercentageCurve};
use rover_runtime::RuntimeConfig;
use rover_runtime::config::DEFAULT_CREDENTIAL;
use rover_types::Axis;
use zeroize::Zeroizing;

/// Persisted operator configuration stored in `~/.rover/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port shared by the websocket, REST and SSE surfaces.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Credential a session must send first. Stored as plain text, so the
    /// file is written owner-only.
    #[serde(default = "default_credential", with = "secret")]
    pub credential: Zeroizing<String>,

    #[serde(default = "default_calibration_path")]
    pub calibration_path: PathBuf,

    #[serde(default = "default_shoulder_path")]
    pub shoulder_path: PathBuf,

    /// Joint init angles saved from the cockpit.
    #[serde(default = "default_trim_path")]
    pub trim_path: PathBuf,

    /// Track acceleration limit in percent per second; `0` applies track
    /// commands at once.
    #[serde(default = "default_motor_accel_limit")]
    pub motor_accel_limit: f32,

    /// Track ramp update rate.
    #[serde(default = "default_motor_ramp_hz")]
    pub motor_ramp_hz: u32,

    /// Drive the tracks through simulated H-bridge PWM outputs instead of
    /// the direct motor bridge.
    #[serde(default)]
    pub pwm_motors: bool,

    /// Beep after drive, light and gripper commands.
    #[serde(default = "default_acknowledge")]
    pub acknowledge: bool,

    /// ADC channel wired to the battery divider.
    #[serde(default)]
    pub adc_channel: u8,

    /// Raw counts at the top of the ADC range.
    #[serde(default = "default_full_scale")]
    pub full_scale: u16,

    /// Volts the divider reads at full scale before calibration.
    #[serde(default = "default_nominal_volts")]
    pub nominal_volts: f64,

    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,

    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,

    #[serde(default = "default_filter_window")]
    pub filter_window: usize,

    #[serde(default = "default_filter_alpha")]
    pub filter_alpha: f64,

    /// Largest change between consecutive battery estimates, in volts.
    #[serde(default = "default_filter_max_step")]
    pub filter_max_step: f64,

    #[serde(default)]
    pub curve: PercentageCurve,

    /// The interlock engages below this voltage.
    #[serde(default = "default_interlock_lower")]
    pub interlock_lower: f64,

    /// ...and releases at or above this one.
    #[serde(default = "default_interlock_upper")]
    pub interlock_upper: f64,

    #[serde(default = "default_acquisition_period_ms")]
    pub acquisition_period_ms: u64,

    #[serde(default = "default_sensor_period_ms")]
    pub sensor_period_ms: u64,

    /// Periodic telemetry push; `0` turns it off.
    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,

    /// Battery telemetry is marked stale after this long without a sample.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Concurrent hardware calls.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_session_queue_depth")]
    pub session_queue_depth: usize,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_write_deadline_ms")]
    pub write_deadline_ms: u64,

    /// Axes whose move commands are refused before dispatch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_axes: Vec<Axis>,
}

mod secret {
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(value: &Zeroizing<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Zeroizing<String>, D::Error> {
        String::deserialize(d).map(Zeroizing::new)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field(
                "credential",
                if self.credential.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("calibration_path", &self.calibration_path)
            .field("shoulder_path", &self.shoulder_path)
            .field("trim_path", &self.trim_path)
            .field("motor_accel_limit", &self.motor_accel_limit)
            .field("pwm_motors", &self.pwm_motors)
            .field("adc_channel", &self.adc_channel)
            .field("curve", &self.curve)
            .field("interlock", &(self.interlock_lower, self.interlock_upper))
            .field("worker_count", &self.worker_count)
            .field("disabled_axes", &self.disabled_axes)
            .finish_non_exhaustive()
    }
}

fn default_port() -> u16 {
    rover_cockpit::DEFAULT_PORT
}
fn default_credential() -> Zeroizing<String> {
    Zeroizing::new(DEFAULT_CREDENTIAL.to_string())
}
fn default_calibration_path() -> PathBuf {
    PathBuf::from("battery_calibration.json")
}
fn default_shoulder_path() -> PathBuf {
    PathBuf::from("servo_calibration.json")
}
fn default_trim_path() -> PathBuf {
    PathBuf::from("servo_trims.json")
}
fn default_motor_accel_limit() -> f32 {
    200.0
}
fn default_motor_ramp_hz() -> u32 {
    50
}
fn default_acknowledge() -> bool {
    true
}
fn default_full_scale() -> u16 {
    u16::MAX
}
fn default_nominal_volts() -> f64 {
    8.4
}
fn default_min_voltage() -> f64 {
    6.8
}
fn default_max_voltage() -> f64 {
    8.4
}
fn default_filter_window() -> usize {
    FilterConfig::default().window
}
fn default_filter_alpha() -> f64 {
    FilterConfig::default().alpha
}
fn default_filter_max_step() -> f64 {
    FilterConfig::default().max_step
}
fn default_interlock_lower() -> f64 {
    6.8
}
fn default_interlock_upper() -> f64 {
    7.0
}
fn default_acquisition_period_ms() -> u64 {
    1_000
}
fn default_sensor_period_ms() -> u64 {
    200
}
fn default_telemetry_interval_ms() -> u64 {
    2_000
}
fn default_stale_after_secs() -> u64 {
    10
}
fn default_worker_count() -> usize {
    4
}
fn default_session_queue_depth() -> usize {
    32
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_write_deadline_ms() -> u64 {
    2_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            credential: default_credential(),
            calibration_path: default_calibration_path(),
            shoulder_path: default_shoulder_path(),
            trim_path: default_trim_path(),
            motor_accel_limit: default_motor_accel_limit(),
            motor_ramp_hz: default_motor_ramp_hz(),
            pwm_motors: false,
            acknowledge: default_acknowledge(),
            adc_channel: 0,
            full_scale: default_full_scale(),
            nominal_volts: default_nominal_volts(),
            min_voltage: default_min_voltage(),
            max_voltage: default_max_voltage(),
            filter_window: default_filter_window(),
            filter_alpha: default_filter_alpha(),
            filter_max_step: default_filter_max_step(),
            curve: PercentageCurve::default(),
            interlock_lower: default_interlock_lower(),
            interlock_upper: default_interlock_upper(),
            acquisition_period_ms: default_acquisition_period_ms(),
            sensor_period_ms: default_sensor_period_ms(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
            worker_count: default_worker_count(),
            session_queue_depth: default_session_queue_depth(),
            idle_timeout_secs: default_idle_timeout_secs(),
            write_deadline_ms: default_write_deadline_ms(),
            disabled_axes: Vec::new(),
        }
    }
}

impl Config {
    /// Map the persisted settings onto the runtime's tunables.
    pub fn to_runtime_config(&self) -> RuntimeConfig {
        let kernel = KernelConfig {
            accel_limit: self.motor_accel_limit.max(0.0),
            acknowledge: self.acknowledge,
            ..KernelConfig::default()
        };
        RuntimeConfig {
            credential: self.credential.clone(),
            calibration_path: self.calibration_path.clone(),
            shoulder_path: self.shoulder_path.clone(),
            trim_path: self.trim_path.clone(),
            ramp_period: Duration::from_secs(1) / self.motor_ramp_hz.max(1),
            adc_channel: self.adc_channel,
            full_scale: self.full_scale,
            nominal_volts: self.nominal_volts,
            min_voltage: self.min_voltage,
            max_voltage: self.max_voltage,
            filter: FilterConfig {
                window: self.filter_window,
                alpha: self.filter_alpha,
                max_step: self.filter_max_step,
            },
            curve: self.curve,
            interlock_lower: self.interlock_lower,
            interlock_upper: self.interlock_upper,
            acquisition_period: Duration::from_millis(self.acquisition_period_ms.max(1)),
            sensor_period: Duration::from_millis(self.sensor_period_ms.max(1)),
            telemetry_interval: (self.telemetry_interval_ms > 0)
                .then(|| Duration::from_millis(self.telemetry_interval_ms)),
            stale_after: Duration::from_secs(self.stale_after_secs),
            worker_count: self.worker_count.max(1),
            session_queue_depth: self.session_queue_depth.max(1),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            write_deadline: Duration::from_millis(self.write_deadline_ms.max(1)),
            disabled_axes: self.disabled_axes.clone(),
            kernel,
            ..RuntimeConfig::default()
        }
    }
}

/// Return the path to `~/.rover/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rover").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    let Some(mut cfg) = read_from(path)? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Parse the file without environment overrides.
fn read_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `ROVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVER_PORT` | `port` |
/// | `ROVER_CREDENTIAL` | `credential` |
/// | `ROVER_CALIBRATION_PATH` | `calibration_path` |
/// | `ROVER_SHOULDER_PATH` | `shoulder_path` |
/// | `ROVER_TRIM_PATH` | `trim_path` |
/// | `ROVER_MOTOR_ACCEL_LIMIT` | `motor_accel_limit` |
/// | `ROVER_PWM_MOTORS` | `pwm_motors` (`true` or `false`) |
/// | `ROVER_WORKERS` | `worker_count` |
/// | `ROVER_CURVE` | `curve` (`linear` or `ocv_2s_liion`) |
/// | `ROVER_DISABLED_AXES` | `disabled_axes` (comma separated) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROVER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("ROVER_CREDENTIAL")
        && !v.is_empty()
    {
        cfg.credential = Zeroizing::new(v);
    }
    if let Ok(v) = std::env::var("ROVER_CALIBRATION_PATH") {
        cfg.calibration_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ROVER_SHOULDER_PATH") {
        cfg.shoulder_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ROVER_TRIM_PATH") {
        cfg.trim_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ROVER_MOTOR_ACCEL_LIMIT")
        && let Ok(limit) = v.parse::<f32>()
    {
        cfg.motor_accel_limit = limit;
    }
    if let Ok(v) = std::env::var("ROVER_PWM_MOTORS")
        && let Ok(on) = v.trim().parse::<bool>()
    {
        cfg.pwm_motors = on;
    }
    if let Ok(v) = std::env::var("ROVER_WORKERS")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.worker_count = n;
    }
    if let Ok(v) = std::env::var("ROVER_CURVE") {
        match v.trim() {
            "linear" => cfg.curve = PercentageCurve::Linear,
            "ocv_2s_liion" => cfg.curve = PercentageCurve::Ocv2sLiIon,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("ROVER_DISABLED_AXES")
        && let Some(axes) = parse_axes(&v)
    {
        cfg.disabled_axes = axes;
    }
}

fn parse_axes(list: &str) -> Option<Vec<Axis>> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| Axis::ALL.into_iter().find(|axis| axis.as_str() == name))
        .collect()
}

/// Save the config to disk, creating `~/.rover/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // The credential lives in this file: owner read/write only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
