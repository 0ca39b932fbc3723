//! IMU and distance polling with push-on-change distance events.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rover_hal::{ImuSource, RangeFinder};
use rover_middleware::{ChangeThrottle, EventBus};
use rover_types::{EventPayload, ImuReading, RoverError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::broadcaster::TelemetryCells;

const SOURCE: &str = "rover-runtime::sensors";

struct Sources {
    imu: Box<dyn ImuSource>,
    range: Box<dyn RangeFinder>,
}

pub struct SensorPoller {
    sources: Arc<Mutex<Sources>>,
    cells: Arc<TelemetryCells>,
    bus: EventBus,
    throttle: ChangeThrottle,
    failing: bool,
}

impl SensorPoller {
    pub fn new(
        imu: Box<dyn ImuSource>,
        range: Box<dyn RangeFinder>,
        cells: Arc<TelemetryCells>,
        bus: EventBus,
        throttle: ChangeThrottle,
    ) -> Self {
        Self {
            sources: Arc::new(Mutex::new(Sources { imu, range })),
            cells,
            bus,
            throttle,
            failing: false,
        }
    }

    /// Read both sensors once. Returns the distance when a
    /// `distance_update` event was published.
    pub async fn tick(&mut self) -> Option<f32> {
        let sources = Arc::clone(&self.sources);
        let read = tokio::task::spawn_blocking(move || {
            let mut p = sources.lock().unwrap_or_else(PoisonError::into_inner);
            (p.imu.read_imu(), p.range.read_distance_cm())
        })
        .await;
        let (imu, distance): (Result<ImuReading, RoverError>, Result<f32, RoverError>) = match read
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "sensor read task failed");
                return None;
            }
        };

        let failed = imu.is_err() || distance.is_err();
        if failed && !self.failing {
            let error = imu.as_ref().err().or(distance.as_ref().err());
            warn!(error = ?error, "sensor read failed");
        }
        self.failing = failed;

        self.cells.set_imu(imu.ok());
        let distance = distance.ok();
        self.cells.set_distance(distance);

        let d = distance?;
        if !self.throttle.offer(d) {
            return None;
        }
        debug!(distance_cm = d, "distance changed");
        self.bus
            .emit(SOURCE, EventPayload::DistanceUpdate { distance_cm: d });
        Some(d)
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
