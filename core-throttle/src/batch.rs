//! Chunked and per-item processing on top of [`RetryExecutor`].

use crate::error::ThrottleError;
use crate::retry::{RetryExecutor, Retryable};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Split `items` into consecutive chunks of at most `size` items.
///
/// Order is preserved; only the last chunk may be shorter. A `size` of zero
/// is treated as one.
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

/// A chunked pass stopped at a failing chunk.
#[derive(Debug)]
pub struct ChunkFailure<R, E> {
    /// Results of the chunks that succeeded, in order.
    pub completed: Vec<R>,
    /// Zero-based index of the failing chunk.
    pub failed_chunk: usize,
    pub error: ThrottleError<E>,
}

/// Result of a per-item pass. Never aborts as a whole.
#[derive(Debug)]
pub struct ItemOutcome<T, R, E> {
    pub successes: Vec<R>,
    pub failures: Vec<(T, ThrottleError<E>)>,
}

impl<T, R, E> Default for ItemOutcome<T, R, E> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchProcessor {
    chunk_size: usize,
    inter_chunk_delay: Duration,
    executor: RetryExecutor,
}

impl BatchProcessor {
    pub fn new(chunk_size: usize, inter_chunk_delay: Duration, executor: RetryExecutor) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            inter_chunk_delay,
            executor,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Run `operation` once per chunk through the executor.
    ///
    /// Stops at the first chunk whose retries are exhausted (or that must be
    /// deferred) and hands back what already succeeded.
    pub async fn process_chunks<T, R, E, F, Fut>(
        &self,
        items: &[T],
        operation: F,
    ) -> Result<Vec<R>, ChunkFailure<R, E>>
    where
        T: Clone,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Retryable + Display,
    {
        let chunks = chunk(items, self.chunk_size);
        let total = chunks.len();
        let mut completed = Vec::with_capacity(total);

        for (index, chunk) in chunks.into_iter().enumerate() {
            if index > 0 && !self.inter_chunk_delay.is_zero() {
                sleep(self.inter_chunk_delay).await;
            }

            debug!(
                api = %self.executor.name(),
                chunk = index + 1,
                total,
                size = chunk.len(),
                "Processing chunk"
            );

            match self.executor.execute(|| operation(chunk.clone())).await {
                Ok(result) => completed.push(result),
                Err(error) => {
                    warn!(
                        api = %self.executor.name(),
                        chunk = index + 1,
                        total,
                        error = %error,
                        "Chunk failed"
                    );
                    return Err(ChunkFailure {
                        completed,
                        failed_chunk: index,
                        error,
                    });
                }
            }
        }

        Ok(completed)
    }

    /// Run `operation` for each item, collecting failures instead of
    /// stopping.
    pub async fn process_individually<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        operation: F,
    ) -> ItemOutcome<T, R, E>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Retryable + Display,
    {
        let mut outcome = ItemOutcome::default();

        for item in items {
            match self.executor.execute(|| operation(item.clone())).await {
                Ok(result) => outcome.successes.push(result),
                Err(error) => outcome.failures.push((item, error)),
            }
        }

        outcome
    }
}
