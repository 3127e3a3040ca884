//! Reconnect backoff
//!
//! Geometric growth with a capped maximum. The session resets the backoff
//! after a sustained period of successful streaming, so a flapping upstream
//! backs off while a one-off drop reconnects quickly again.

use std::time::Duration;

/// Geometric backoff with a capped maximum
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: u32,
    next: Duration,
}

impl Backoff {
    /// Create a backoff starting at `initial`, multiplying by `factor`
    /// (at least 2) up to `max`
    pub fn new(initial: Duration, max: Duration, factor: u32) -> Self {
        Self {
            initial,
            max,
            factor: factor.max(2),
            next: initial,
        }
    }

    /// The delay to wait before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * self.factor).min(self.max);
        delay
    }

    /// Return to the initial delay
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometric_growth_and_cap() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2,
        );

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 2);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_factor_floor() {
        // A factor below 2 would never grow; it is clamped.
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 1);
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    }
}
