//! Pacing of mutation calls across all batch workers.
//!
//! One [`RateLimit`] instance is shared by every worker; each item consumes
//! one permit before its mutation runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Wait until one more item may be processed.
    async fn acquire(&self);
}

/// No pacing at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unthrottled;

#[async_trait]
impl RateLimit for Unthrottled {
    async fn acquire(&self) {}
}

/// Token bucket refilled continuously at `refill_per_sec`, holding at most
/// `capacity` tokens. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// # Panics
    ///
    /// Panics if `refill_per_sec` is 0. A zero burst is treated as 1.
    pub fn new(refill_per_sec: u32, burst: u32) -> Self {
        assert!(refill_per_sec > 0, "refill_per_sec must be > 0");
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_per_sec: f64::from(refill_per_sec),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[async_trait]
impl RateLimit for TokenBucket {
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state, Instant::now());
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Build the shared limiter for `items_per_sec`; 0 disables pacing.
pub fn rate_limit_for(items_per_sec: u32, burst: u32) -> Arc<dyn RateLimit> {
    if items_per_sec == 0 {
        Arc::new(Unthrottled)
    } else {
        Arc::new(TokenBucket::new(items_per_sec, burst))
    }
}
