//! Capped exponential reconnect backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Per-connection reconnect delay: doubles each consecutive failure up to the
/// cap, with up to one second of random jitter to avoid thundering-herd
/// reconnects across workers. Reset after the connection has stayed healthy.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
    cap: Duration,
}

impl Backoff {
    pub fn new(cap: Duration) -> Self {
        Self { attempt: 0, cap }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay for the next reconnect, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        // Clamp the shift so 2^attempt cannot overflow before the cap applies.
        let shift = self.attempt.min(16);
        let base = Duration::from_secs(1u64 << shift).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=1_000));
        base + jitter
    }
}
