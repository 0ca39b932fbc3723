//! Track ramp driver.
//!
//! With an acceleration limit configured the kernel only records target
//! track speeds; this task advances the output on a fixed period. Each step
//! runs on the blocking pool and takes only the motor bus, so joint calls
//! never hold it up.

use std::sync::Arc;
use std::time::Duration;

use rover_kernel::ControlKernel;
use rover_middleware::EventBus;
use rover_types::{Axis, EventPayload, RoverError};
use tokio::time::MissedTickBehavior;
use tracing::{error, trace};

const SOURCE: &str = "rover-runtime::ramp";

pub struct TrackRamper {
    kernel: Arc<ControlKernel>,
    bus: EventBus,
}

impl TrackRamper {
    pub fn new(kernel: Arc<ControlKernel>, bus: EventBus) -> Self {
        Self { kernel, bus }
    }

    /// Advance the ramp by `dt`. Returns `true` when the tracks changed.
    pub async fn step(&self, dt: Duration) -> bool {
        let kernel = Arc::clone(&self.kernel);
        let result = tokio::task::spawn_blocking(move || kernel.ramp_step(dt))
            .await
            .unwrap_or_else(|e| Err(RoverError::Channel(format!("ramp task failed: {e}"))));
        match result {
            Ok(moved) => {
                if moved {
                    trace!("track ramp advanced");
                }
                moved
            }
            Err(e) => {
                error!(error = %e, "track ramp write failed");
                self.bus.emit(
                    SOURCE,
                    EventPayload::HardwareFault {
                        axis: Axis::Drive,
                        channel: None,
                        message: e.to_string(),
                    },
                );
                false
            }
        }
    }

    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.step(period).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_hal::sim::{FaultKey, SimRig};
    use rover_kernel::KernelConfig;
    use rover_middleware::Topic;
    use rover_types::{Command, Direction};

    fn ramper(rig: &SimRig) -> (TrackRamper, Arc<ControlKernel>, EventBus) {
        let config = KernelConfig {
            accel_limit: 200.0,
            ..KernelConfig::default()
        };
        let kernel = Arc::new(ControlKernel::new(config, rig.bank()));
        let bus = EventBus::default();
        (
            TrackRamper::new(Arc::clone(&kernel), bus.clone()),
            kernel,
            bus,
        )
    }

    fn forward() -> Command {
        Command::Move {
            axis: Axis::Drive,
            direction: Direction::Positive,
        }
    }

    #[tokio::test]
    async fn steps_until_the_target_is_reached() {
        let rig = SimRig::new();
        let (ramper, kernel, _bus) = ramper(&rig);
        assert!(!ramper.step(Duration::from_millis(250)).await);

        kernel.execute(&forward()).unwrap();
        assert!(ramper.step(Duration::from_millis(250)).await);
        assert!(ramper.step(Duration::from_millis(250)).await);
        assert!(!ramper.step(Duration::from_millis(250)).await);
        assert_eq!(rig.log.motor_calls(1), 2);
    }

    #[tokio::test]
    async fn write_failure_is_published() {
        let rig = SimRig::new();
        let (ramper, kernel, bus) = ramper(&rig);
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        kernel.execute(&forward()).unwrap();
        rig.log.inject_fault(FaultKey::Motor(1));

        assert!(!ramper.step(Duration::from_millis(20)).await);
        match alerts.recv().await.unwrap().payload {
            EventPayload::HardwareFault { axis, .. } => assert_eq!(axis, Axis::Drive),
            other => panic!("unexpected {other:?}"),
        }
    }
}
