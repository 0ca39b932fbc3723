//! [`ChangeThrottle`] – push-on-change gate for sensor values.
//!
//! A value is forwarded only when it moved by at least `threshold` since
//! the last forwarded value *and* the `governor` rate limiter has a cell
//! available. Suppressed values do not update the reference, so a change
//! held back by the limiter is still pushed once the limiter allows it.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

pub struct ChangeThrottle {
    threshold: f32,
    limiter: DefaultDirectRateLimiter,
    last: Option<f32>,
}

impl ChangeThrottle {
    /// Forward changes of at least `threshold`, no more often than once per
    /// `min_interval`.
    pub fn new(threshold: f32, min_interval: Duration) -> Self {
        let quota = Quota::with_period(min_interval.max(Duration::from_millis(1)))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        Self {
            threshold,
            limiter: RateLimiter::direct(quota),
            last: None,
        }
    }

    /// Returns `true` when `value` should be pushed.
    pub fn offer(&mut self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        if let Some(last) = self.last {
            if (value - last).abs() < self.threshold {
                return false;
            }
        }
        if self.limiter.check().is_err() {
            return false;
        }
        self.last = Some(value);
        true
    }

    pub fn last(&self) -> Option<f32> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_is_forwarded() {
        let mut t = ChangeThrottle::new(1.0, Duration::from_millis(1));
        assert!(t.offer(50.0));
        assert_eq!(t.last(), Some(50.0));
    }

    #[test]
    fn small_changes_are_suppressed() {
        let mut t = ChangeThrottle::new(1.0, Duration::from_millis(1));
        assert!(t.offer(50.0));
        assert!(!t.offer(50.4));
        assert!(!t.offer(49.2));
        assert_eq!(t.last(), Some(50.0));
    }

    #[test]
    fn rate_limit_holds_back_bursts() {
        let mut t = ChangeThrottle::new(1.0, Duration::from_secs(60));
        assert!(t.offer(10.0));
        assert!(!t.offer(30.0));
        // Reference was not moved by the suppressed value.
        assert_eq!(t.last(), Some(10.0));
    }

    #[test]
    fn large_changes_pass_once_limiter_refills() {
        let mut t = ChangeThrottle::new(1.0, Duration::from_millis(5));
        assert!(t.offer(10.0));
        std::thread::sleep(Duration::from_millis(20));
        assert!(t.offer(12.0));
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let mut t = ChangeThrottle::new(1.0, Duration::from_millis(1));
        assert!(!t.offer(f32::NAN));
        assert_eq!(t.last(), None);
    }
}
