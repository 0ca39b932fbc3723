//! Battery acquisition loop.
//!
//! Samples the ADC on its own timer, independent of command traffic, feeds
//! the [`BatteryMonitor`], pushes `battery_status` on significant change,
//! and re-evaluates the low-voltage interlock on every fresh estimate.
//! Acquisition never takes a scheduler permit and never waits for an
//! actuator call, so a busy actuator cannot pause it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rover_hal::AdcSource;
use rover_kernel::{ComponentHealth, ControlKernel, Interlock, Watchdog};
use rover_middleware::EventBus;
use rover_power::{BatteryMonitor, significant_change};
use rover_types::{BatteryEstimate, EventPayload, RoverError};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

const SOURCE: &str = "rover-runtime::acquisition";
const ADC_KEY: &str = "battery_adc";

pub struct BatteryAcquisition {
    adc: Arc<Mutex<Box<dyn AdcSource>>>,
    channel: u8,
    monitor: Arc<BatteryMonitor>,
    kernel: Arc<ControlKernel>,
    interlock: Interlock,
    watchdog: Watchdog<&'static str>,
    last_pushed: Option<BatteryEstimate>,
    bus: EventBus,
}

impl BatteryAcquisition {
    pub fn new(
        adc: Box<dyn AdcSource>,
        channel: u8,
        monitor: Arc<BatteryMonitor>,
        kernel: Arc<ControlKernel>,
        interlock: Interlock,
        bus: EventBus,
        stale_after: Duration,
    ) -> Self {
        let mut watchdog = Watchdog::new();
        watchdog.register(ADC_KEY, stale_after, Instant::now().into_std());
        Self {
            adc: Arc::new(Mutex::new(adc)),
            channel,
            monitor,
            kernel,
            interlock,
            watchdog,
            last_pushed: None,
            bus,
        }
    }

    pub fn interlock_engaged(&self) -> bool {
        self.interlock.engaged()
    }

    /// Take one sample and act on it. Returns the resulting estimate.
    pub async fn tick(&mut self) -> BatteryEstimate {
        let adc = Arc::clone(&self.adc);
        let channel = self.channel;
        let read = tokio::task::spawn_blocking(move || {
            adc.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read_adc_raw(channel)
        })
        .await
        .unwrap_or_else(|e| Err(RoverError::Channel(format!("adc read task failed: {e}"))));

        let now = Instant::now().into_std();
        let mut estimate = match read {
            Ok(raw) => {
                self.watchdog.heartbeat(&ADC_KEY, now);
                self.monitor.ingest(raw)
            }
            Err(e) => self.monitor.record_failure(&e),
        };
        if self.watchdog.health(&ADC_KEY, now) == ComponentHealth::TimedOut {
            estimate = self.monitor.mark_stale();
        }

        self.push_if_changed(&estimate);
        // A stale estimate keeps the interlock where it is.
        if !estimate.stale {
            self.evaluate_interlock(estimate.voltage);
        }
        estimate
    }

    fn push_if_changed(&mut self, estimate: &BatteryEstimate) {
        let changed = self
            .last_pushed
            .as_ref()
            .is_none_or(|prev| significant_change(prev, estimate));
        if changed {
            self.bus
                .emit(SOURCE, EventPayload::BatteryStatus(estimate.clone()));
            self.last_pushed = Some(estimate.clone());
        }
    }

    fn evaluate_interlock(&mut self, voltage: f64) {
        let Some(engaged) = self.interlock.evaluate(voltage) else {
            return;
        };
        if engaged {
            warn!(voltage, "low-voltage interlock engaged");
        } else {
            info!(voltage, "low-voltage interlock released");
        }
        if self.kernel.set_interlock(engaged) {
            // The hold waits for any in-flight shoulder call; the sampler
            // does not.
            let kernel = Arc::clone(&self.kernel);
            tokio::task::spawn_blocking(move || match kernel.hold_rising_shoulder() {
                Ok(true) => info!("rising shoulder held by interlock"),
                Ok(false) => {}
                Err(e) => error!(error = %e, "interlock hold failed"),
            });
        }
        self.bus
            .emit(SOURCE, EventPayload::SafetyInterlock { engaged, voltage });
    }

    pub async fn run(mut self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_hal::sim::{SimCall, SimRig};
    use rover_kernel::KernelConfig;
    use rover_types::{Axis, Command, Direction};
    use rover_middleware::Topic;
    use rover_power::{CalibrationStore, MonitorConfig, nominal_record};
    use tempfile::TempDir;

    struct Fixture {
        rig: SimRig,
        acq: BatteryAcquisition,
        kernel: Arc<ControlKernel>,
        bus: EventBus,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let rig = SimRig::new();
        let kernel = Arc::new(ControlKernel::new(KernelConfig::default(), rig.bank()));
        let store = CalibrationStore::open(
            dir.path().join("battery.json"),
            nominal_record(u16::MAX, 8.4, 6.8, 8.4),
        )
        .unwrap();
        let monitor = Arc::new(BatteryMonitor::new(MonitorConfig::default(), store));
        let bus = EventBus::default();
        let acq = BatteryAcquisition::new(
            rig.adc_source(),
            0,
            monitor,
            Arc::clone(&kernel),
            Interlock::new(6.8, 7.0).unwrap(),
            bus.clone(),
            Duration::from_secs(10),
        );
        Fixture {
            rig,
            acq,
            kernel,
            bus,
            _dir: dir,
        }
    }

    fn raw_for(volts: f64) -> u16 {
        (volts / 8.4 * f64::from(u16::MAX)).round() as u16
    }

    #[tokio::test]
    async fn interlock_holds_inside_the_band() {
        let mut f = fixture();
        f.rig.adc.set_raw(raw_for(6.5));
        f.acq.tick().await;
        assert!(f.acq.interlock_engaged());
        assert!(f.kernel.interlock_engaged());

        // Climbs towards 6.95 but never reaches the upper threshold.
        f.rig.adc.set_raw(raw_for(6.95));
        for _ in 0..30 {
            f.acq.tick().await;
            assert!(f.acq.interlock_engaged());
        }

        f.rig.adc.set_raw(raw_for(7.6));
        for _ in 0..30 {
            f.acq.tick().await;
        }
        assert!(!f.acq.interlock_engaged());
        assert!(!f.kernel.interlock_engaged());
    }

    #[tokio::test]
    async fn interlock_transitions_are_announced_once() {
        let mut f = fixture();
        let mut alerts = f.bus.subscribe_to(Topic::Alerts);
        f.rig.adc.set_raw(raw_for(6.5));
        for _ in 0..3 {
            f.acq.tick().await;
        }
        let event = alerts.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::SafetyInterlock { engaged: true, .. }
        ));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), alerts.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn interlock_does_not_wait_for_a_busy_shoulder() {
        let mut f = fixture();
        f.rig.log.set_sweep_delay(Duration::from_millis(1500));
        let raising = {
            let kernel = Arc::clone(&f.kernel);
            std::thread::spawn(move || {
                kernel.execute(&Command::Move {
                    axis: Axis::Shoulder,
                    direction: Direction::Positive,
                })
            })
        };
        std::thread::sleep(Duration::from_millis(100));

        f.rig.adc.set_raw(raw_for(6.5));
        let started = std::time::Instant::now();
        f.acq.tick().await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(f.kernel.interlock_engaged());

        raising.join().unwrap().unwrap();
        let mut held = false;
        for _ in 0..100 {
            if f.rig.log.calls().last() == Some(&SimCall::Hold { channel: 0 }) {
                held = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(held);
        assert!(f.kernel.axis(Axis::Shoulder).unwrap().locked);
    }

    #[tokio::test]
    async fn unchanged_readings_are_not_pushed_twice() {
        let mut f = fixture();
        let mut telemetry = f.bus.subscribe_to(Topic::Telemetry);
        f.acq.tick().await;
        f.acq.tick().await;
        assert_eq!(
            telemetry.recv().await.unwrap().payload.name(),
            "battery_status"
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(20), telemetry.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn unreachable_adc_degrades_to_stale() {
        let mut f = fixture();
        f.acq.tick().await;
        f.rig.adc.disconnect();
        let mut last = None;
        for _ in 0..5 {
            last = Some(f.acq.tick().await);
        }
        let est = last.unwrap();
        assert!(est.stale);
        assert_eq!(est.percentage, None);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_adc_times_out() {
        let mut f = fixture();
        f.acq.tick().await;
        f.rig.adc.disconnect();
        tokio::time::advance(Duration::from_secs(11)).await;
        // One failure is below the failure threshold; the deadline decides.
        assert!(f.acq.tick().await.stale);
    }
}
