//! Throughput limiter
//!
//! Issues permits at a fixed rate. Each permit reserves the next free slot on
//! a shared timeline, so concurrent callers are spaced `1/rate` apart and idle
//! time never accumulates into a burst.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    rate: u64,
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// `rate` is permits per second; zero is clamped to one.
    pub fn new(rate: u64) -> Self {
        let rate = rate.max(1);
        Self {
            rate,
            interval: Duration::from_nanos(1_000_000_000 / rate),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Waits for the next permit. Cancelling the wait forfeits the slot.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
