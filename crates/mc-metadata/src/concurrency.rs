//! Bounded fan-out of independent async operations.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Run `f` over every input with at most `limit` futures in flight.
///
/// `None` runs everything at once. Results come back in completion order.
pub(crate) async fn bounded<T, R, F, Fut>(inputs: Vec<T>, limit: Option<usize>, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let limit = limit.unwrap_or(inputs.len()).max(1);
    stream::iter(inputs).map(f).buffer_unordered(limit).collect().await
}
