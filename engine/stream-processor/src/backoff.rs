//! Capped exponential backoff for broker poll errors

use crate::config::BackoffConfig;
use std::time::Duration;

/// Backoff sequence: `initial, initial * m, initial * m^2, ...` capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    next: Duration,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let initial = Duration::from_millis(config.initial_ms);
        Self {
            initial,
            max: Duration::from_millis(config.max_ms),
            multiplier: config.multiplier.max(1),
            next: initial,
        }
    }

    /// Start over from the initial delay after a successful poll
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        self.next = current.saturating_mul(self.multiplier).min(self.max);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig { initial_ms: 100, max_ms: 1_000, multiplier: 2 }
    }

    #[test]
    fn backoff_grows_until_capped() {
        let delays: Vec<u128> = Backoff::new(&config()).take(6).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn backoff_reset_restarts_sequence() {
        let mut backoff = Backoff::new(&config());
        backoff.next();
        backoff.next();
        backoff.reset();
        assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
    }
}
