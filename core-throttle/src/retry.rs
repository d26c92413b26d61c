//! Retry with server hints and exponential backoff.

use crate::cooldown::SharedCooldown;
use crate::error::ThrottleError;
use crate::rate_limiter::RateLimiter;
use bridge_traits::BridgeError;
use core_runtime::config::RetrySettings;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Classification of an error for retry purposes.
pub trait Retryable {
    /// Explicit wait requested by the remote side.
    fn retry_after(&self) -> Option<Duration>;

    /// Whether the same call may succeed if repeated.
    fn is_transient(&self) -> bool;
}

impl Retryable for BridgeError {
    fn retry_after(&self) -> Option<Duration> {
        BridgeError::retry_after(self)
    }

    fn is_transient(&self) -> bool {
        BridgeError::is_transient(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    /// Longest hinted wait slept in place.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay(),
            multiplier: settings.multiplier,
            max_backoff: settings.max_backoff(),
            max_wait: settings.max_wait(),
        }
    }

    /// Backoff after the `failed_attempts`-th consecutive failure (1-based):
    /// `initial * multiplier^(n-1)`, capped at `max_backoff`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Runs one fallible operation against a rate-limited API.
///
/// Every attempt first waits out the shared cooldown, then takes a token
/// from the API's limiter. On failure:
/// - a hint within `max_wait` is published as the shared cooldown and the
///   call is retried once it passes
/// - a hint beyond `max_wait` returns [`ThrottleError::RateLimitExceeded`]
///   immediately so the caller can defer
/// - a transient error without hint backs off exponentially
/// - anything else is returned as [`ThrottleError::Fatal`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    name: String,
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
    cooldown: Arc<SharedCooldown>,
}

impl RetryExecutor {
    pub fn new(
        name: impl Into<String>,
        policy: RetryPolicy,
        limiter: Arc<RateLimiter>,
        cooldown: Arc<SharedCooldown>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            limiter,
            cooldown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cooldown(&self) -> &Arc<SharedCooldown> {
        &self.cooldown
    }

    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ThrottleError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.cooldown.wait().await;
            self.limiter.acquire().await;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(api = %self.name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if let Some(hint) = error.retry_after() {
                if hint > self.policy.max_wait {
                    warn!(
                        api = %self.name,
                        attempt,
                        retry_after_secs = hint.as_secs_f64(),
                        max_wait_secs = self.policy.max_wait.as_secs_f64(),
                        "Requested wait exceeds maximum, giving up for now"
                    );
                    return Err(ThrottleError::RateLimitExceeded {
                        retry_after: hint,
                        max_wait: self.policy.max_wait,
                        source: error,
                    });
                }
                if attempt >= self.policy.max_attempts {
                    return Err(ThrottleError::Exhausted {
                        attempts: attempt,
                        source: error,
                    });
                }

                warn!(
                    api = %self.name,
                    attempt,
                    delay_ms = hint.as_millis() as u64,
                    reason = %error,
                    "Rate limited, retrying after requested wait"
                );
                self.cooldown.extend(hint).await;
                continue;
            }

            if !error.is_transient() {
                return Err(ThrottleError::Fatal(error));
            }
            if attempt >= self.policy.max_attempts {
                return Err(ThrottleError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                api = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %error,
                "Transient failure, backing off"
            );
            sleep(delay).await;
        }
    }
}
