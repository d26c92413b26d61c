//! # Throttled Execution
//!
//! Everything that stands between the sync core and two rate-limited APIs:
//!
//! - [`RateLimiter`] - token bucket shared by all workers of one API
//! - [`SharedCooldown`] - "pause until" deadline published by the first
//!   worker that gets throttled and honored by every other worker
//! - [`RetryExecutor`] - retries one operation, honoring server wait hints
//!   and falling back to exponential backoff
//! - [`BatchProcessor`] - chunked and per-item processing on top of the
//!   executor
//! - [`run_bounded`] - fixed-size worker pool that stops dispatching on
//!   cancellation
//!
//! ## Example
//!
//! ```ignore
//! use core_throttle::{RateLimiter, RetryExecutor, RetryPolicy, SharedCooldown};
//! use std::sync::Arc;
//!
//! let limiter = Arc::new(RateLimiter::new("destination", 5.0, 10));
//! let cooldown = Arc::new(SharedCooldown::new());
//! let executor = RetryExecutor::new("destination", RetryPolicy::default(), limiter, cooldown);
//!
//! let id = executor.execute(|| destination.create_product(&payload)).await?;
//! ```

pub mod batch;
pub mod cooldown;
pub mod error;
pub mod pool;
pub mod rate_limiter;
pub mod retry;

pub use batch::{chunk, BatchProcessor, ChunkFailure, ItemOutcome};
pub use cooldown::SharedCooldown;
pub use error::{Result, ThrottleError};
pub use pool::run_bounded;
pub use rate_limiter::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy, Retryable};
