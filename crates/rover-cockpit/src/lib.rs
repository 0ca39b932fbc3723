//! `rover-cockpit` – the operator-facing transport.
//!
//! A single listener serves:
//!
//! | Surface | Path | Purpose |
//! |---|---|---|
//! | Websocket | any path with `Upgrade: websocket` | Command session: credential, then tokens/JSON commands; bus events are pushed back |
//! | REST | `GET/POST /api/calibration` | Battery calibration with revision ETags |
//! | REST | `GET/POST /api/servo/shoulder` | Shoulder servo base/raise angles |
//! | SSE | `GET /api/events` | `battery_status`, `battery_calibration`, `distance_update`, ... |
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rover_cockpit::CockpitServer;
//! use rover_hal::sim::SimRig;
//! use rover_runtime::{Hardware, RoverRuntime, RuntimeConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let rig = SimRig::new();
//!     let runtime = Arc::new(
//!         RoverRuntime::new(RuntimeConfig::default(), Hardware::simulated(&rig)).unwrap(),
//!     );
//!     runtime.spawn_background();
//!     CockpitServer::new(runtime).run().await.unwrap();
//! }
//! ```

pub mod http;
pub mod server;
pub mod sse;
pub mod ws;

pub use server::{BoundServer, CockpitServer, DEFAULT_PORT};
