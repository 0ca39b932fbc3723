//! [`Watchdog`] – deadline tracking for keyed heartbeats.
//!
//! Producers call [`Watchdog::heartbeat`] whenever they show signs of life,
//! e.g. on every fresh battery sample. A key is *timed out* once its
//! deadline has passed. The caller supplies `now`, so the
//! same type works against a real clock and a paused test clock.
//!
//! The watchdog never stops an actuator. It only drives telemetry staleness.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Health state reported for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentHealth {
    Healthy,
    TimedOut,
}

struct Entry {
    last_heartbeat: Instant,
    timeout: Duration,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > self.timeout
    }
}

/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use rover_kernel::watchdog::{ComponentHealth, Watchdog};
///
/// let start = Instant::now();
/// let mut wd = Watchdog::new();
/// wd.register("adc", Duration::from_secs(1), start);
/// assert_eq!(wd.health(&"adc", start), ComponentHealth::Healthy);
/// assert_eq!(
///     wd.health(&"adc", start + Duration::from_secs(2)),
///     ComponentHealth::TimedOut
/// );
/// ```
pub struct Watchdog<K> {
    entries: HashMap<K, Entry>,
}

impl<K> Default for Watchdog<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Watchdog<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` with a heartbeat `timeout`, starting healthy at `now`.
    /// Re-registering resets the deadline.
    pub fn register(&mut self, key: K, timeout: Duration, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                last_heartbeat: now,
                timeout,
            },
        );
    }

    /// Reset the deadline of `key`. No-op for unknown keys.
    pub fn heartbeat(&mut self, key: &K, now: Instant) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_heartbeat = now;
        }
    }

    /// Unknown keys are reported as timed out.
    pub fn health(&self, key: &K, now: Instant) -> ComponentHealth {
        match self.entries.get(key) {
            Some(entry) if !entry.expired(now) => ComponentHealth::Healthy,
            _ => ComponentHealth::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    #[test]
    fn fresh_key_is_healthy() {
        let now = Instant::now();
        let mut wd = Watchdog::new();
        wd.register("adc", Duration::from_secs(5), now);
        assert_eq!(wd.health(&"adc", now), ComponentHealth::Healthy);
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let t0 = Instant::now();
        let mut wd = Watchdog::new();
        wd.register("adc", Duration::from_millis(20), t0);
        wd.heartbeat(&"adc", at(t0, 15));
        assert_eq!(wd.health(&"adc", at(t0, 30)), ComponentHealth::Healthy);
        assert_eq!(wd.health(&"adc", at(t0, 40)), ComponentHealth::TimedOut);
    }

    #[test]
    fn unknown_keys_are_timed_out() {
        let t0 = Instant::now();
        let mut wd: Watchdog<&str> = Watchdog::new();
        assert_eq!(wd.health(&"ghost", t0), ComponentHealth::TimedOut);
        wd.heartbeat(&"ghost", t0);
        assert_eq!(wd.health(&"ghost", t0), ComponentHealth::TimedOut);
    }

    #[test]
    fn re_registering_resets_the_deadline() {
        let t0 = Instant::now();
        let mut wd = Watchdog::new();
        wd.register("adc", Duration::from_millis(20), t0);
        assert_eq!(wd.health(&"adc", at(t0, 30)), ComponentHealth::TimedOut);
        wd.register("adc", Duration::from_millis(20), at(t0, 30));
        assert_eq!(wd.health(&"adc", at(t0, 40)), ComponentHealth::Healthy);
    }
}
