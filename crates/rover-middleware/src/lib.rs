//! `rover-middleware` – event routing between producers and transports.
//!
//! # Modules
//!
//! - [`bus`] – topic-filtered publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`throttle`] – push-on-change gate combining a change threshold with a
//!   `governor` rate limiter.

pub mod bus;
pub mod throttle;

pub use bus::{EventBus, Subscription, Topic};
pub use throttle::ChangeThrottle;
