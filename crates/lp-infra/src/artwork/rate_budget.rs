//! Token bucket gating outbound artwork lookups.

use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_RATE_CAPACITY: u32 = 1;
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_REFILL_INTERVAL: Duration = Duration::from_secs(60);

/// Refill-rate token bucket. Rate-limited responses double the refill interval up to
/// a cap; the next successful lookup restores the base rate.
#[derive(Debug, Clone)]
pub struct RateBudget {
    capacity: u32,
    tokens: u32,
    base_interval: Duration,
    refill_interval: Duration,
    max_interval: Duration,
    next_refill: Instant,
}

impl RateBudget {
    pub fn new(capacity: u32, refill_interval: Duration, max_interval: Duration, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: capacity,
            base_interval: refill_interval,
            refill_interval,
            max_interval: max_interval.max(refill_interval),
            next_refill: now,
        }
    }

    pub fn with_defaults(now: Instant) -> Self {
        Self::new(DEFAULT_RATE_CAPACITY, DEFAULT_REFILL_INTERVAL, MAX_REFILL_INTERVAL, now)
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens == 0 {
            return false;
        }
        if self.tokens == self.capacity {
            self.next_refill = now + self.refill_interval;
        }
        self.tokens -= 1;
        true
    }

    /// Earliest instant at which [`try_acquire`](Self::try_acquire) can succeed.
    pub fn next_available(&self, now: Instant) -> Instant {
        if self.tokens > 0 {
            now
        } else {
            self.next_refill.max(now)
        }
    }

    /// Apply backoff after a rate-limited response and drain the bucket.
    pub fn penalize(&mut self, now: Instant) {
        self.refill_interval = (self.refill_interval * 2).min(self.max_interval);
        self.tokens = 0;
        self.next_refill = now + self.refill_interval;
    }

    pub fn on_success(&mut self) {
        self.refill_interval = self.base_interval;
    }

    fn refill(&mut self, now: Instant) {
        while self.tokens < self.capacity && now >= self.next_refill {
            self.tokens += 1;
            self.next_refill += self.refill_interval;
        }
    }
}
