//! Reconnect delay schedule.
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! There is no attempt limit: the connection manager retries for as long as
//! the session lives. A CONNACK resets the schedule.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,

    /// Delay returned by the next call to `next_delay`
    current_delay: Duration,

    max_delay: Duration,

    multiplier: f64,

    /// Failed attempts since the last reset
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier: multiplier.max(1.0),
            attempt: 0,
        }
    }

    /// Doubling schedule between `initial` and `max`
    pub fn doubling(initial: Duration, max: Duration) -> Self {
        Self::new(initial, max, 2.0)
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay to wait now and advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let sleep = self.current_delay;

        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = if next >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(next)
        };

        sleep
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    /// 1s doubling up to 30s
    fn default() -> Self {
        Self::doubling(Duration::from_secs(1), Duration::from_secs(30))
    }
}
