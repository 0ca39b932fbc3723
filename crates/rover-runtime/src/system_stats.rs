//! Host CPU temperature, CPU usage and RAM usage.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rover_types::CpuStats;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::broadcaster::TelemetryCells;

pub const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

pub struct SystemStats {
    sys: System,
    thermal_path: PathBuf,
}

impl SystemStats {
    pub fn new(thermal_path: impl Into<PathBuf>) -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            sys,
            thermal_path: thermal_path.into(),
        }
    }

    /// Refresh and read. CPU usage is measured since the previous call, so
    /// the first sample after start-up reads low.
    pub fn sample(&mut self) -> CpuStats {
        self.sys.refresh_cpu_all();
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        let ram_percent = if total == 0 {
            0.0
        } else {
            (self.sys.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        CpuStats {
            temperature_c: read_millidegrees(&self.thermal_path),
            usage_percent: self.sys.global_cpu_usage(),
            ram_percent,
        }
    }

    /// Sample every `period` into `cells`.
    pub async fn run(mut self, cells: Arc<TelemetryCells>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let stats = self.sample();
            debug!(?stats, "system stats sampled");
            cells.set_cpu(stats);
        }
    }
}

impl Default for SystemStats {
    fn default() -> Self {
        Self::new(THERMAL_ZONE)
    }
}

/// Kernel thermal zones report millidegrees Celsius.
fn read_millidegrees(path: &Path) -> Option<f32> {
    let raw = std::fs::read_to_string(path).ok()?;
    let milli: f32 = raw.trim().parse().ok()?;
    Some(milli / 1000.0)
}
