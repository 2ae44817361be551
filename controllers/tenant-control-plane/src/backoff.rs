//! # Fibonacci Backoff
//!
//! Requeue delays for tenants whose reconciliation keeps failing. The delay
//! follows the Fibonacci sequence in minutes, capped at a maximum:
//! 1m, 1m, 2m, 3m, 5m, 8m, 10m with the default bounds.

use std::time::Duration;

/// Stateful Fibonacci backoff, one per tenant
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Backoff starting at `min_minutes` and never exceeding `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Current delay, advancing the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next_minutes = self.prev_minutes.saturating_add(self.current_minutes);
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next_minutes.min(self.max_minutes);
        delay
    }

    /// Back to the first delay, after a successful reconciliation
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}
