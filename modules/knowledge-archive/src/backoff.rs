use std::time::Duration;

use rand::Rng;

/// Delay before a browser retry. `retry` starts at 1 for the first retry.
pub trait Backoff: Send + Sync {
    fn delay(&self, retry: u32) -> Duration;
}

/// Uniformly random delay inside a fixed window, to outlast short rate-limit windows.
#[derive(Debug, Clone, Copy)]
pub struct JitterBackoff {
    pub min: Duration,
    pub max: Duration,
}

impl Default for JitterBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(5),
            max: Duration::from_secs(15),
        }
    }
}

impl Backoff for JitterBackoff {
    fn delay(&self, _retry: u32) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// No delay at all. Used in tests and for callers that pace retries themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Backoff for NoDelay {
    fn delay(&self, _retry: u32) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_inside_window() {
        let backoff = JitterBackoff::default();
        for retry in 1..200 {
            let d = backoff.delay(retry);
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(15), "{d:?}");
        }
    }

    #[test]
    fn degenerate_window_returns_min() {
        let backoff = JitterBackoff {
            min: Duration::from_secs(2),
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
    }

    #[test]
    fn no_delay_is_zero() {
        assert_eq!(NoDelay.delay(3), Duration::ZERO);
    }
}
