//! Telemetry broadcaster.
//!
//! Producers (sensor poller, system stats, battery monitor, kernel) each keep
//! a last-known-value cell up to date. Building a snapshot only reads those
//! cells, so a broadcast never waits on hardware.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rover_kernel::ControlKernel;
use rover_middleware::EventBus;
use rover_power::BatteryMonitor;
use rover_types::{CpuStats, EventPayload, ImuReading, TelemetrySnapshot};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::trace;

const SOURCE: &str = "rover-runtime::broadcaster";

/// Last-known sensor and host values.
pub struct TelemetryCells {
    imu: watch::Sender<Option<ImuReading>>,
    distance: watch::Sender<Option<f32>>,
    cpu: watch::Sender<CpuStats>,
}

impl Default for TelemetryCells {
    fn default() -> Self {
        Self {
            imu: watch::channel(None).0,
            distance: watch::channel(None).0,
            cpu: watch::channel(CpuStats::default()).0,
        }
    }
}

impl TelemetryCells {
    pub fn set_imu(&self, reading: Option<ImuReading>) {
        self.imu.send_replace(reading);
    }

    pub fn set_distance(&self, distance_cm: Option<f32>) {
        self.distance.send_replace(distance_cm);
    }

    pub fn set_cpu(&self, stats: CpuStats) {
        self.cpu.send_replace(stats);
    }

    pub fn imu(&self) -> Option<ImuReading> {
        *self.imu.borrow()
    }

    pub fn distance(&self) -> Option<f32> {
        *self.distance.borrow()
    }

    pub fn cpu(&self) -> CpuStats {
        *self.cpu.borrow()
    }
}

pub struct Broadcaster {
    kernel: Arc<ControlKernel>,
    battery: Arc<BatteryMonitor>,
    cells: Arc<TelemetryCells>,
    bus: EventBus,
}

impl Broadcaster {
    pub fn new(
        kernel: Arc<ControlKernel>,
        battery: Arc<BatteryMonitor>,
        cells: Arc<TelemetryCells>,
        bus: EventBus,
    ) -> Self {
        Self {
            kernel,
            battery,
            cells,
            bus,
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp: Utc::now(),
            cpu: self.cells.cpu(),
            battery: self.battery.estimate(),
            imu: self.cells.imu(),
            distance_cm: self.cells.distance(),
            mode: self.kernel.mode(),
            camera_hq: self.kernel.camera_hq(),
            interlock_engaged: self.kernel.interlock_engaged(),
            axes: self.kernel.axes(),
        }
    }

    /// Publish a `telemetry` event. Returns the number of receivers.
    pub fn broadcast_snapshot(&self) -> usize {
        self.bus
            .emit(SOURCE, EventPayload::Telemetry(self.snapshot()))
    }

    /// Push a snapshot every `interval` for as long as the task runs.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let receivers = self.broadcast_snapshot();
            trace!(receivers, "telemetry snapshot pushed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_hal::sim::SimRig;
    use rover_kernel::KernelConfig;
    use rover_power::{CalibrationStore, MonitorConfig, nominal_record};
    use rover_types::Command;

    fn broadcaster(dir: &tempfile::TempDir) -> (Broadcaster, Arc<TelemetryCells>, EventBus) {
        let rig = SimRig::new();
        let kernel = Arc::new(ControlKernel::new(KernelConfig::default(), rig.bank()));
        let store = CalibrationStore::open(
            dir.path().join("battery.json"),
            nominal_record(u16::MAX, 8.4, 6.8, 8.4),
        )
        .unwrap();
        let battery = Arc::new(BatteryMonitor::new(MonitorConfig::default(), store));
        let cells = Arc::new(TelemetryCells::default());
        let bus = EventBus::default();
        let b = Broadcaster::new(kernel, battery, Arc::clone(&cells), bus.clone());
        (b, cells, bus)
    }

    #[test]
    fn snapshot_reflects_last_known_values() {
        let dir = tempfile::tempdir().unwrap();
        let (b, cells, _bus) = broadcaster(&dir);
        cells.set_distance(Some(42.0));
        b.kernel.execute(&Command::CameraQuality { high: true }).unwrap();

        let snap = b.snapshot();
        assert_eq!(snap.distance_cm, Some(42.0));
        assert!(snap.camera_hq);
        assert!(snap.imu.is_none());
        assert!(snap.battery.stale);
        assert_eq!(snap.axes.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_pushes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let (b, _cells, bus) = broadcaster(&dir);
        let mut sub = bus.subscribe();
        let task = tokio::spawn(Arc::new(b).run(Duration::from_secs(2)));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.payload.name(), "telemetry");
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(sub.recv().await.unwrap().payload.name(), "telemetry");
        task.abort();
    }
}
