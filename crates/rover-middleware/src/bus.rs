//! Headless, typed publish/subscribe event bus.
//!
//! Uses a [`tokio::sync::broadcast`] channel so that every subscriber
//! receives every message without any single subscriber blocking the
//! others. A subscriber that falls behind loses the oldest events and keeps
//! going; it never slows the publisher down.
//!
//! # Topics
//!
//! Every [`EventPayload`] belongs to one [`Topic`], and each
//! [`Subscription`] carries the set of topics it wants:
//!
//! | Topic | Events |
//! |---|---|
//! | [`Topic::Telemetry`] | `telemetry`, `battery_status`, `distance_update` |
//! | [`Topic::Calibration`] | `battery_calibration`, `shoulder_calibration` |
//! | [`Topic::Alerts`] | `safety_interlock`, `hardware_fault`, `command_rejected` |
//!
//! Some events are addressed to one operator session. Only a subscription
//! opened with [`EventBus::subscribe_session`] for that session yields them.

use std::collections::HashSet;

use rover_types::{Event, EventPayload};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Telemetry,
    Calibration,
    Alerts,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Telemetry, Topic::Calibration, Topic::Alerts];

    /// Topic an event payload is routed on.
    pub fn of(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::Telemetry(_)
            | EventPayload::BatteryStatus(_)
            | EventPayload::DistanceUpdate { .. } => Topic::Telemetry,
            EventPayload::BatteryCalibration(_) | EventPayload::ShoulderCalibration(_) => {
                Topic::Calibration
            }
            EventPayload::SafetyInterlock { .. }
            | EventPayload::HardwareFault { .. }
            | EventPayload::CommandRejected { .. } => Topic::Alerts,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every subscriber.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// `0` means nobody is listening, which is a normal condition.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Convenience: wrap `payload` in an [`Event`] from `source` and publish.
    pub fn emit(&self, source: &str, payload: EventPayload) -> usize {
        self.publish(Event::new(source, payload))
    }

    /// Subscribe to every topic.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_topics(Topic::ALL)
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> Subscription {
        self.subscribe_topics([topic])
    }

    pub fn subscribe_topics(&self, topics: impl IntoIterator<Item = Topic>) -> Subscription {
        Subscription {
            topics: topics.into_iter().collect(),
            session: None,
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to every topic on behalf of `session`, including the
    /// events addressed to it.
    pub fn subscribe_session(&self, session: Uuid) -> Subscription {
        Subscription {
            session: Some(session),
            ..self.subscribe()
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A receiver that only yields events on its topic set that are visible to
/// its session.
pub struct Subscription {
    topics: HashSet<Topic>,
    session: Option<Uuid>,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    fn wants(&self, payload: &EventPayload) -> bool {
        self.topics.contains(&Topic::of(payload)) && payload.visible_to(self.session)
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` when the bus is closed and no further events will
    /// arrive. Lag is logged and skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event.payload) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "subscription lagged, oldest events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::{Axis, BatteryEstimate};

    fn battery() -> EventPayload {
        EventPayload::BatteryStatus(BatteryEstimate::default())
    }

    fn fault() -> EventPayload {
        EventPayload::HardwareFault {
            axis: Axis::Wrist,
            channel: Some(1),
            message: "nack".into(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.emit("test", battery()), 0);
    }

    #[test]
    fn payloads_map_to_topics() {
        assert_eq!(Topic::of(&battery()), Topic::Telemetry);
        assert_eq!(Topic::of(&fault()), Topic::Alerts);
        assert_eq!(
            Topic::of(&EventPayload::ShoulderCalibration(Default::default())),
            Topic::Calibration
        );
        let rejected = EventPayload::CommandRejected {
            session: Default::default(),
            command: rover_types::Command::Home,
            error: rover_types::RoverError::Busy("queue full".into()),
        };
        assert_eq!(Topic::of(&rejected), Topic::Alerts);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        assert_eq!(bus.emit("rover-runtime::acquisition", battery()), 1);
        let event = sub.recv().await.unwrap();
        assert_eq!(event.source, "rover-runtime::acquisition");
        assert_eq!(event.payload.name(), "battery_status");
    }

    #[tokio::test]
    async fn topic_filter_skips_other_topics() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        bus.emit("a", battery());
        bus.emit("b", fault());
        let event = alerts.recv().await.unwrap();
        assert_eq!(event.source, "b");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::default();
        let mut s1 = bus.subscribe();
        let mut s2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.emit("x", fault());
        assert!(s1.recv().await.is_some());
        assert!(s2.recv().await.is_some());
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_receiving() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.emit(&format!("e{i}"), battery());
        }
        // The two newest survive.
        assert_eq!(sub.recv().await.unwrap().source, "e3");
        assert_eq!(sub.recv().await.unwrap().source, "e4");
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn session_events_reach_only_their_session() {
        let bus = EventBus::default();
        let mine = Uuid::new_v4();
        let mut own = bus.subscribe_session(mine);
        let mut other = bus.subscribe_session(Uuid::new_v4());
        let mut anonymous = bus.subscribe_to(Topic::Alerts);

        bus.emit(
            "s",
            EventPayload::CommandRejected {
                session: mine,
                command: rover_types::Command::Home,
                error: rover_types::RoverError::Busy("queue full".into()),
            },
        );
        bus.emit("f", fault());

        assert_eq!(own.recv().await.unwrap().source, "s");
        assert_eq!(own.recv().await.unwrap().source, "f");
        assert_eq!(other.recv().await.unwrap().source, "f");
        assert_eq!(anonymous.recv().await.unwrap().source, "f");
    }
}
