//! Token-bucket rate limiter used to pace leaf dispatch.
//!
//! The bucket refills continuously at `rate` tokens per second up to
//! `capacity`. Waiters queue on a fair async mutex, so `acquire` calls are
//! served strictly in arrival order and the holder sleeps with the lock held
//! until its tokens are available. Dropping or cancelling a waiter releases the
//! lock.

use std::fmt;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterError {
    Cancelled,
}

impl fmt::Display for LimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterError::Cancelled => write!(f, "rate limiter wait cancelled"),
        }
    }
}

impl std::error::Error for LimiterError {}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter whose capacity equals its per-second rate. The bucket
    /// starts full.
    pub fn per_second(rate: f64) -> Self {
        Self::new(rate, rate)
    }

    pub fn new(rate: f64, capacity: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            f64::MIN_POSITIVE
        };
        let capacity = capacity.max(1.0);
        Self {
            rate,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Waits until `n` tokens are available and debits them.
    ///
    /// A request larger than the capacity waits for a full bucket and leaves it
    /// in debt, so the long-run rate still holds.
    pub async fn acquire(&self, n: u32, cancel: &CancellationToken) -> Result<(), LimiterError> {
        let requested = f64::from(n);
        let required = requested.min(self.capacity);

        let mut bucket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
            guard = self.bucket.lock() => guard,
        };

        loop {
            bucket.refill(self.rate, self.capacity, Instant::now());
            if bucket.tokens >= required {
                bucket.tokens -= requested;
                return Ok(());
            }

            let deficit = required - bucket.tokens;
            let wait = refill_wait(deficit, self.rate);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }

    /// Tokens currently available, after refilling up to now.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(self.rate, self.capacity, Instant::now());
        bucket.tokens
    }
}

/// Time for `rate` to produce `deficit` tokens. Saturates for rates so small
/// the wait does not fit in a `Duration`.
fn refill_wait(deficit: f64, rate: f64) -> Duration {
    Duration::try_from_secs_f64(deficit / rate).unwrap_or(Duration::MAX)
}
