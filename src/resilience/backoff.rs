//! Reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential delay for the given attempt (1-based), capped at `max_ms`,
/// plus up to 10% jitter. Attempt 0 is immediate.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(exponential).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Attempt counter for a relay session's reconnect loop.
///
/// With `base == max` (the default, one second) this is a fixed delay.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base_ms = base.as_millis() as u64;
        Self {
            base_ms,
            max_ms: (max.as_millis() as u64).max(base_ms),
            attempt: 0,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        calculate_backoff(self.attempt, self.base_ms, self.max_ms)
    }

    /// Call once a connection is established.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);
        assert!(calculate_backoff(1, 100, 2000).as_millis() >= 100);
        assert!(calculate_backoff(2, 100, 2000).as_millis() >= 200);

        let capped = calculate_backoff(10, 100, 1000).as_millis();
        assert!((1000..1100).contains(&capped));
    }

    #[test]
    fn fixed_reconnect_delay() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(1));
        for _ in 0..5 {
            let delay = backoff.next_delay().as_millis();
            assert!((1000..1100).contains(&delay));
        }
        assert_eq!(backoff.attempts(), 5);
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
    }
}
