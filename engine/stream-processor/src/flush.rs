//! Interval trigger for snapshot flushes
//!
//! The scheduler does not own a timer task; the consumer loop asks it whether
//! a flush is due after every poll, so flushing happens on the same single
//! writer that mutates the state.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct FlushScheduler {
    interval: Duration,
    last_flush: Instant,
}

impl FlushScheduler {
    /// Start a scheduler whose first flush is due one interval from now
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_flush: Instant::now() }
    }

    pub fn is_due(&self) -> bool {
        self.last_flush.elapsed() >= self.interval
    }

    /// Restart the interval; called after every flush attempt, successful or not
    pub fn mark_flushed(&mut self) {
        self.last_flush = Instant::now();
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_due_after_interval() {
        let mut scheduler = FlushScheduler::new(Duration::from_secs(60));
        assert!(!scheduler.is_due());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!scheduler.is_due());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(scheduler.is_due());

        scheduler.mark_flushed();
        assert!(!scheduler.is_due());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(scheduler.is_due());
    }
}
