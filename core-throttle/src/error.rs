use bridge_traits::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a throttled operation that did not succeed.
#[derive(Error, Debug)]
pub enum ThrottleError<E = BridgeError> {
    /// Every allowed attempt failed with a retryable error.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The server asked for a wait longer than the configured maximum.
    /// Nothing was slept; the caller should defer the work.
    #[error("Rate limit requires waiting {}s (max {}s): {source}", .retry_after.as_secs_f64(), .max_wait.as_secs_f64())]
    RateLimitExceeded {
        retry_after: Duration,
        max_wait: Duration,
        #[source]
        source: E,
    },

    /// Non-retryable failure, returned on first occurrence.
    #[error("Operation failed: {0}")]
    Fatal(#[source] E),
}

impl<E> ThrottleError<E> {
    /// Requested wait when the error is a deferral signal.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ThrottleError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_rate_limit_exceeded(&self) -> bool {
        matches!(self, ThrottleError::RateLimitExceeded { .. })
    }

    /// The last underlying error.
    pub fn source_error(&self) -> &E {
        match self {
            ThrottleError::Exhausted { source, .. }
            | ThrottleError::RateLimitExceeded { source, .. }
            | ThrottleError::Fatal(source) => source,
        }
    }

    pub fn into_source(self) -> E {
        match self {
            ThrottleError::Exhausted { source, .. }
            | ThrottleError::RateLimitExceeded { source, .. }
            | ThrottleError::Fatal(source) => source,
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, ThrottleError<E>>;
