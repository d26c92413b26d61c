//! Fixed-size worker pool.

use futures::stream::{self, StreamExt};
use std::future::{ready, Future};
use tokio_util::sync::CancellationToken;

/// Drive `operation` over `items` with at most `workers` futures in flight.
///
/// The token is checked before each item is started. Once it is cancelled
/// no new item starts, while items already running complete normally.
/// Results come back in completion order.
pub async fn run_bounded<I, F, Fut, R>(
    items: I,
    workers: usize,
    cancel: &CancellationToken,
    operation: F,
) -> Vec<R>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items)
        .take_while(|_| ready(!cancel.is_cancelled()))
        .map(operation)
        .buffer_unordered(workers.max(1))
        .collect()
        .await
}
