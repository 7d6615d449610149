//! Per-observer evaluation throttling.
//!
//! Bounds evaluation frequency under mutation storms by coalescing
//! bursts: within one throttle window an observer gets at most one
//! immediate evaluation and one deferred evaluation, no matter how many
//! evaluate requests arrive.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::request::ObserverId;

/// What to do with an evaluate request that just arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// First request in the window: evaluate immediately.
    Proceed,
    /// Second request in the window: schedule one deferred evaluation
    /// after the given delay.
    Defer(Duration),
    /// Third or later request in the window: already covered by the
    /// pending deferred evaluation, do nothing.
    Coalesced,
}

/// Counter for one observer's current throttle window.
#[derive(Debug)]
struct Window {
    count: u32,
    opened: Instant,
}

/// Coalesces bursts of evaluate requests per observer.
///
/// Keeps a short-lived counter per observer id with a TTL equal to the
/// throttle rate. A rate of zero disables throttling entirely; every
/// request proceeds immediately.
#[derive(Debug)]
pub struct ThrottleController {
    rate: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl ThrottleController {
    /// Creates a controller with the given throttle rate.
    #[must_use]
    pub fn new(rate: Duration) -> Self {
        Self {
            rate,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admits one evaluate request for `observer` and decides its fate.
    pub fn admit(&self, observer: &ObserverId) -> ThrottleDecision {
        if self.rate.is_zero() {
            return ThrottleDecision::Proceed;
        }

        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Lazily drop expired windows so the map stays small.
        windows.retain(|_, window| now.duration_since(window.opened) < self.rate);

        match windows.get_mut(observer.as_str()) {
            None => {
                windows.insert(
                    observer.as_str().to_string(),
                    Window {
                        count: 1,
                        opened: now,
                    },
                );
                ThrottleDecision::Proceed
            }
            Some(window) => {
                window.count = window.count.saturating_add(1);
                if window.count == 2 {
                    ThrottleDecision::Defer(self.rate)
                } else {
                    ThrottleDecision::Coalesced
                }
            }
        }
    }

    /// Drops all throttle windows (operational reset).
    pub fn reset(&self) {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn observer(tag: char) -> ObserverId {
        ObserverId::from_string(tag.to_string().repeat(64))
    }

    #[test]
    fn zero_rate_disables_throttling() {
        let throttle = ThrottleController::new(Duration::ZERO);
        let id = observer('a');
        for _ in 0..5 {
            assert_eq!(throttle.admit(&id), ThrottleDecision::Proceed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_yields_one_immediate_and_one_deferred() {
        let rate = Duration::from_secs(2);
        let throttle = ThrottleController::new(rate);
        let id = observer('a');

        assert_eq!(throttle.admit(&id), ThrottleDecision::Proceed);
        assert_eq!(throttle.admit(&id), ThrottleDecision::Defer(rate));
        assert_eq!(throttle.admit(&id), ThrottleDecision::Coalesced);
        assert_eq!(throttle.admit(&id), ThrottleDecision::Coalesced);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expires_after_rate() {
        let rate = Duration::from_secs(2);
        let throttle = ThrottleController::new(rate);
        let id = observer('a');

        assert_eq!(throttle.admit(&id), ThrottleDecision::Proceed);
        tokio::time::advance(rate + Duration::from_millis(1)).await;
        assert_eq!(throttle.admit(&id), ThrottleDecision::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_are_throttled_independently() {
        let throttle = ThrottleController::new(Duration::from_secs(2));
        let a = observer('a');
        let b = observer('b');

        assert_eq!(throttle.admit(&a), ThrottleDecision::Proceed);
        assert_eq!(throttle.admit(&b), ThrottleDecision::Proceed);
        assert!(matches!(throttle.admit(&a), ThrottleDecision::Defer(_)));
        assert!(matches!(throttle.admit(&b), ThrottleDecision::Defer(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_windows() {
        let throttle = ThrottleController::new(Duration::from_secs(2));
        let id = observer('a');

        assert_eq!(throttle.admit(&id), ThrottleDecision::Proceed);
        throttle.reset();
        assert_eq!(throttle.admit(&id), ThrottleDecision::Proceed);
    }
}
