//! Operator session state, owned by the transport task serving it.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::scheduler::Lane;

pub struct Session {
    id: Uuid,
    authenticated: bool,
    last_seen: Instant,
    lane: Option<Lane>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            authenticated: false,
            last_seen: Instant::now(),
            lane: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn authenticate(&mut self, lane: Lane) {
        self.authenticated = true;
        self.lane = Some(lane);
    }

    pub(crate) fn lane(&self) -> Option<&Lane> {
        self.lane.as_ref()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time left before the session counts as idle.
    pub fn idle_remaining(&self, timeout: Duration) -> Duration {
        timeout.saturating_sub(self.last_seen.elapsed())
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() >= timeout
    }

    /// End the session. Commands it already queued still execute; the
    /// returned future resolves once they have.
    pub async fn close(self) {
        if let Some(lane) = self.lane {
            lane.drain().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_after_timeout_without_messages() {
        let mut session = Session::new();
        let timeout = Duration::from_secs(30);
        assert!(!session.is_idle(timeout));

        tokio::time::advance(Duration::from_secs(20)).await;
        session.touch();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!session.is_idle(timeout));
        assert_eq!(session.idle_remaining(timeout), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(session.is_idle(timeout));
        assert_eq!(session.idle_remaining(timeout), Duration::ZERO);
    }

    #[test]
    fn new_sessions_start_unauthenticated() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert!(session.lane().is_none());
        assert_ne!(session.id(), Session::new().id());
    }
}
