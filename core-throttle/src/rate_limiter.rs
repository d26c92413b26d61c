//! Token bucket rate limiter.

use core_runtime::config::RateLimitSettings;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Tolerance for float drift when comparing token counts.
const TOKEN_EPSILON: f64 = 1e-9;

/// Token bucket shared by every worker calling one API.
///
/// The bucket starts full. Refill and decrement happen in one critical
/// section; waiting for the next token happens outside the lock, so a
/// sleeping caller never blocks others from checking the bucket.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    rate_per_second: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate_per_second: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_second).min(burst);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// `rate_per_second` must be positive and `burst` at least 1; both are
    /// clamped otherwise.
    pub fn new(name: impl Into<String>, rate_per_second: f64, burst: u32) -> Self {
        let rate_per_second = if rate_per_second.is_finite() && rate_per_second > 0.0 {
            rate_per_second
        } else {
            f64::MIN_POSITIVE.max(1e-6)
        };
        let burst = f64::from(burst.max(1));

        Self {
            name: name.into(),
            rate_per_second,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &RateLimitSettings) -> Self {
        Self::new(name, settings.rate_per_second, settings.burst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill(Instant::now(), self.rate_per_second, self.burst);
                if state.tokens >= 1.0 - TOKEN_EPSILON {
                    state.tokens = (state.tokens - 1.0).max(0.0);
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate_per_second)
            };

            trace!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "Waiting for token");
            sleep(wait).await;
        }
    }

    /// Take a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        state.refill(Instant::now(), self.rate_per_second, self.burst);
        if state.tokens >= 1.0 - TOKEN_EPSILON {
            state.tokens = (state.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(Instant::now(), self.rate_per_second, self.burst);
        state.tokens
    }
}
