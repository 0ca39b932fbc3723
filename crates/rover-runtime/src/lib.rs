//! Rover runtime: everything between the transport and the hardware.
//!
//! [`RoverRuntime`] owns the control kernel, the battery monitor, the
//! calibration stores, the event bus and the command dispatcher, and
//! spawns the background producers:
//!
//! | Task | Cadence | Publishes |
//! |---|---|---|
//! | [`acquisition::BatteryAcquisition`] | `acquisition_period` | `battery_status`, `safety_interlock` |
//! | [`sensors::SensorPoller`] | `sensor_period` | `distance_update` |
//! | [`system_stats::SystemStats`] | `stats_period` | (cells only) |
//! | [`broadcaster::Broadcaster`] | `telemetry_interval` | `telemetry` |
//! | [`ramp::TrackRamper`] | `ramp_period`, when ramped | `hardware_fault` on write failure |

pub mod acquisition;
pub mod broadcaster;
pub mod config;
pub mod dispatcher;
pub mod protocol;
pub mod ramp;
pub mod scheduler;
pub mod sensors;
pub mod session;
pub mod system_stats;
pub mod telemetry;

use std::sync::{Arc, Mutex, PoisonError};

use rover_hal::sim::SimRig;
use rover_hal::{ActuatorBank, AdcSource, BeepPattern, ImuSource, RangeFinder};
use rover_kernel::{
    CommandGate, ControlKernel, DisabledAxesRule, InitAngles, Interlock, LowVoltageRule,
    TrimStore,
};
use rover_middleware::{ChangeThrottle, EventBus};
use rover_power::{
    BatteryMonitor, CalibrationOutcome, CalibrationStore, MonitorConfig, ServoTrimStore,
    ShoulderCalibrationStore,
};
use rover_types::{CalibrationView, Command, EventPayload, RoverError, ShoulderCalibration};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use acquisition::BatteryAcquisition;
pub use broadcaster::{Broadcaster, TelemetryCells};
pub use config::RuntimeConfig;
pub use dispatcher::{Dispatcher, Frame, Response};
pub use protocol::{Reply, ReplyStatus};
pub use ramp::TrackRamper;
pub use scheduler::{Lane, Scheduler};
pub use sensors::SensorPoller;
pub use session::Session;
pub use system_stats::SystemStats;

const SOURCE: &str = "rover-runtime";

/// Hardware capabilities injected at start-up.
pub struct Hardware {
    pub bank: ActuatorBank,
    pub adc: Box<dyn AdcSource>,
    pub imu: Box<dyn ImuSource>,
    pub range: Box<dyn RangeFinder>,
}

impl Hardware {
    /// Recording simulation drivers controlled through `rig`.
    pub fn simulated(rig: &SimRig) -> Self {
        Self {
            bank: rig.bank(),
            adc: rig.adc_source(),
            imu: rig.imu_source(),
            range: rig.range_finder(),
        }
    }
}

/// Joint init angles kept in the trim document.
struct PersistedTrims(Arc<ServoTrimStore>);

impl TrimStore for PersistedTrims {
    fn save(&self, channel: u8, angle: f32) -> Result<(), RoverError> {
        self.0.save(channel, angle)
    }

    fn save_all(&self, angles: &InitAngles) -> Result<(), RoverError> {
        self.0.save_all(angles)
    }
}

/// Background producers that own a hardware source.
pub struct Pollers {
    pub acquisition: BatteryAcquisition,
    pub sensors: SensorPoller,
}

pub struct RoverRuntime {
    config: RuntimeConfig,
    kernel: Arc<ControlKernel>,
    battery: Arc<BatteryMonitor>,
    shoulder: Arc<ShoulderCalibrationStore>,
    bus: EventBus,
    cells: Arc<TelemetryCells>,
    broadcaster: Arc<Broadcaster>,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    pollers: Mutex<Option<Pollers>>,
}

impl RoverRuntime {
    /// Open the calibration and trim documents (creating them when absent),
    /// apply the shoulder calibration to the servo, and wire every
    /// component. The buzzer plays the start-up alert once the joints are
    /// homed.
    ///
    /// # Errors
    ///
    /// [`RoverError::Persistence`] when a document cannot be read or
    /// created, [`RoverError::InvalidCalibration`] for inconsistent
    /// thresholds.
    pub fn new(config: RuntimeConfig, hardware: Hardware) -> Result<Self, RoverError> {
        let store = CalibrationStore::open(&config.calibration_path, config.default_calibration())?;
        let battery = Arc::new(BatteryMonitor::new(
            MonitorConfig {
                filter: config.filter,
                curve: config.curve,
                nominal_scale: config.nominal_scale(),
                stale_after_failures: config.stale_after_failures,
            },
            store,
        ));
        let shoulder = Arc::new(ShoulderCalibrationStore::open(
            &config.shoulder_path,
            ShoulderCalibration::default(),
        )?);
        let interlock = Interlock::new(config.interlock_lower, config.interlock_upper)?;

        let trims = Arc::new(ServoTrimStore::open(
            &config.trim_path,
            config
                .kernel
                .joints
                .iter()
                .map(|j| (j.channel, j.home_angle))
                .collect(),
        )?);
        let kernel_config = config.kernel.clone().with_init_angles(&trims.get());
        let kernel = Arc::new(
            ControlKernel::new(kernel_config, hardware.bank)
                .with_trim_store(Arc::new(PersistedTrims(trims))),
        );
        // The shoulder calibration decides the shoulder's home angle.
        if let Err(e) = kernel.apply_shoulder_calibration(shoulder.get()) {
            warn!(error = %e, "could not home shoulder at start-up");
        }
        kernel.announce(BeepPattern::Alert);

        let mut gate = CommandGate::new();
        gate.add_rule(Box::new(LowVoltageRule::new(kernel.interlock_flag())));
        if !config.disabled_axes.is_empty() {
            gate.add_rule(Box::new(DisabledAxesRule {
                axes: config.disabled_axes.clone(),
            }));
        }

        let bus = EventBus::default();
        let cells = Arc::new(TelemetryCells::default());
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&kernel),
            Arc::clone(&battery),
            Arc::clone(&cells),
            bus.clone(),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&kernel),
            bus.clone(),
            config.worker_count,
            config.session_queue_depth,
        );
        let dispatcher = Dispatcher::new(
            config.credential.clone(),
            gate,
            scheduler.clone(),
            Arc::clone(&broadcaster),
        );

        let pollers = Pollers {
            acquisition: BatteryAcquisition::new(
                hardware.adc,
                config.adc_channel,
                Arc::clone(&battery),
                Arc::clone(&kernel),
                interlock,
                bus.clone(),
                config.stale_after,
            ),
            sensors: SensorPoller::new(
                hardware.imu,
                hardware.range,
                Arc::clone(&cells),
                bus.clone(),
                ChangeThrottle::new(config.distance_threshold_cm, config.distance_min_interval),
            ),
        };

        info!(
            calibration = %config.calibration_path.display(),
            revision = battery.calibration().revision,
            workers = config.worker_count,
            "runtime ready"
        );
        Ok(Self {
            config,
            kernel,
            battery,
            shoulder,
            bus,
            cells,
            broadcaster,
            scheduler,
            dispatcher,
            pollers: Mutex::new(Some(pollers)),
        })
    }

    /// Take the hardware pollers to drive them by hand. Afterwards
    /// [`spawn_background`](Self::spawn_background) only starts the
    /// host-side tasks.
    pub fn take_pollers(&self) -> Option<Pollers> {
        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Start the background producers. Must run inside a tokio runtime.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(Pollers {
            acquisition,
            sensors,
        }) = self.take_pollers()
        {
            tasks.push(tokio::spawn(acquisition.run(self.config.acquisition_period)));
            tasks.push(tokio::spawn(sensors.run(self.config.sensor_period)));
        }
        tasks.push(tokio::spawn(
            SystemStats::default().run(Arc::clone(&self.cells), self.config.stats_period),
        ));
        if let Some(interval) = self.config.telemetry_interval {
            tasks.push(tokio::spawn(Arc::clone(&self.broadcaster).run(interval)));
        }
        if self.kernel.is_ramped() {
            let ramper = TrackRamper::new(Arc::clone(&self.kernel), self.bus.clone());
            tasks.push(tokio::spawn(ramper.run(self.config.ramp_period)));
        }
        tasks
    }

    // ------------------------------------------------------------------
    // Calibration surface
    // ------------------------------------------------------------------

    pub fn calibration_view(&self) -> CalibrationView {
        self.battery.calibration_view()
    }

    /// One-point battery calibration. Publishes `battery_status` and
    /// `battery_calibration` on success.
    #[instrument(skip(self))]
    pub async fn calibrate(
        &self,
        voltage: f64,
        expected_revision: Option<u64>,
    ) -> Result<CalibrationOutcome, RoverError> {
        let battery = Arc::clone(&self.battery);
        let outcome =
            tokio::task::spawn_blocking(move || battery.calibrate(voltage, expected_revision))
                .await
                .map_err(|e| RoverError::Channel(format!("calibration task failed: {e}")))??;
        self.bus.emit(
            SOURCE,
            EventPayload::BatteryStatus(outcome.estimate.clone()),
        );
        self.bus.emit(
            SOURCE,
            EventPayload::BatteryCalibration(outcome.calibration.clone()),
        );
        Ok(outcome)
    }

    pub fn shoulder(&self) -> ShoulderCalibration {
        self.shoulder.get()
    }

    /// Persist a shoulder calibration, re-home the servo, and publish
    /// `shoulder_calibration`. Returns the clamped value that was stored.
    #[instrument(skip(self))]
    pub async fn update_shoulder(
        &self,
        requested: ShoulderCalibration,
    ) -> Result<ShoulderCalibration, RoverError> {
        let store = Arc::clone(&self.shoulder);
        let kernel = Arc::clone(&self.kernel);
        let stored = tokio::task::spawn_blocking(move || {
            let stored = store.update(requested)?;
            kernel.apply_shoulder_calibration(stored)?;
            Ok::<_, RoverError>(stored)
        })
        .await
        .map_err(|e| RoverError::Channel(format!("shoulder update task failed: {e}")))??;
        self.bus
            .emit(SOURCE, EventPayload::ShoulderCalibration(stored));
        Ok(stored)
    }

    /// Stop every axis through the worker pool.
    pub async fn stop_all(&self) -> Result<usize, RoverError> {
        self.scheduler.execute(Uuid::nil(), Command::StopAll).await
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn kernel(&self) -> &Arc<ControlKernel> {
        &self.kernel
    }

    pub fn battery(&self) -> &Arc<BatteryMonitor> {
        &self.battery
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}
