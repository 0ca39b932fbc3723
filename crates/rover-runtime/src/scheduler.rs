//! Execution scheduler: the boundary between message intake and hardware.
//!
//! Each authenticated session gets a [`Lane`], a bounded queue drained by one
//! task, so a session's commands execute in receipt order. Every execution
//! takes a permit from a shared semaphore sized to the worker count and runs
//! on the blocking pool, so hardware calls never stall a read loop and the
//! number of concurrent hardware calls is bounded no matter how many
//! messages arrive.
//!
//! Dropping a [`Lane`] stops intake only; commands already queued still run.

use std::sync::Arc;

use rover_kernel::ControlKernel;
use rover_middleware::EventBus;
use rover_types::{Command, EventPayload, RoverError};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

const SOURCE: &str = "rover-runtime::scheduler";

#[derive(Clone)]
pub struct Scheduler {
    kernel: Arc<ControlKernel>,
    bus: EventBus,
    permits: Arc<Semaphore>,
    depth: usize,
}

impl Scheduler {
    pub fn new(kernel: Arc<ControlKernel>, bus: EventBus, workers: usize, depth: usize) -> Self {
        Self {
            kernel,
            bus,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            depth: depth.max(1),
        }
    }

    /// Open the ordered queue for one session.
    pub fn open_lane(&self, session: Uuid) -> Lane {
        let (tx, mut rx) = mpsc::channel::<Command>(self.depth);
        let scheduler = self.clone();
        let worker = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                // Errors are reported inside `execute`.
                let _ = scheduler.execute(session, command).await;
            }
            debug!(session = %session, "lane drained");
        });
        Lane {
            session,
            tx,
            worker,
        }
    }

    /// Run one command on the worker pool and wait for it.
    ///
    /// Hardware faults are logged and published as `hardware_fault` events
    /// before being returned. Any other failure, such as a shoulder raise
    /// refused by an interlock that engaged after the command was queued,
    /// is published as `command_rejected` addressed to `session`.
    pub async fn execute(&self, session: Uuid, command: Command) -> Result<usize, RoverError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| RoverError::Channel(format!("worker pool closed: {e}")))?;
        let kernel = Arc::clone(&self.kernel);
        let job = command.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            kernel.execute(&job)
        })
        .await
        .map_err(|e| RoverError::Channel(format!("worker failed: {e}")))?;

        match &result {
            Ok(calls) => debug!(session = %session, ?command, calls, "command executed"),
            Err(RoverError::HardwareFault { component, details }) => {
                let axis = command.axis();
                let channel = axis.and_then(|a| self.kernel.channel_of(a));
                error!(
                    session = %session,
                    ?command,
                    component = %component,
                    channel = ?channel,
                    details = %details,
                    "hardware fault"
                );
                if let Some(axis) = axis {
                    self.bus.emit(
                        SOURCE,
                        EventPayload::HardwareFault {
                            axis,
                            channel,
                            message: details.clone(),
                        },
                    );
                }
            }
            Err(e) => {
                warn!(session = %session, ?command, error = %e, "command rejected");
                self.bus.emit(
                    SOURCE,
                    EventPayload::CommandRejected {
                        session,
                        command,
                        error: e.clone(),
                    },
                );
            }
        }
        result
    }
}

/// Ordered command queue of one session.
pub struct Lane {
    session: Uuid,
    tx: mpsc::Sender<Command>,
    worker: JoinHandle<()>,
}

impl Lane {
    /// Queue `command` without waiting.
    ///
    /// # Errors
    ///
    /// [`RoverError::Busy`] when the queue is full, [`RoverError::Channel`]
    /// when the lane task is gone.
    pub fn submit(&self, command: Command) -> Result<(), RoverError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RoverError::Busy(format!("session {} has too many queued commands", self.session))
            }
            mpsc::error::TrySendError::Closed(_) => RoverError::Channel("lane closed".into()),
        })
    }

    /// Close intake and wait until every queued command has run.
    pub async fn drain(self) {
        let Lane { tx, worker, .. } = self;
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "lane task ended abnormally");
        }
    }
}
