//! Exponential backoff with jitter
//!
//! Shared by the dispatcher (transient-failure waits) and the streaming
//! session (reconnect delays). Each call to `next_delay` doubles the base
//! delay up to the ceiling and applies ±10% jitter so concurrent callers
//! don't retry in lockstep.

use rand::Rng;
use std::time::Duration;

const JITTER_FACTOR: f64 = 0.1;

#[derive(Debug)]
pub struct BackoffPolicy {
    initial: Duration,
    ceiling: Duration,
    current: Duration,
    attempt: u32,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        Self {
            initial,
            ceiling,
            current: initial,
            attempt: 0,
        }
    }

    /// Delay for the next retry; doubles the base each call, capped at the
    /// ceiling, with jitter applied.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = apply_jitter(self.current, JITTER_FACTOR);
        let doubled = self.current.saturating_mul(2);
        self.current = doubled.min(self.ceiling);
        delay
    }

    /// Back to the initial delay after a success.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

fn apply_jitter(duration: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return duration;
    }
    let base_millis = duration.as_millis() as f64;
    let jitter_range = base_millis * factor;
    let mut rng = rand::rng();
    let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
    let adjusted = (base_millis + jitter).max(1.0);
    Duration::from_millis(adjusted as u64)
}
