//! Cold, restartable producers
//!
//! A [`Producer`] does no work until activated. Every call to
//! [`Producer::activate`] returns a fresh, independent run; nothing is shared
//! between runs unless the producer captures shared state itself.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::time::Duration;

/// One run of a producer: items, or a failure of the generation logic.
pub type ProducerStream<T> = BoxStream<'static, anyhow::Result<T>>;

/// Description of how to generate a sequence on demand.
///
/// Any `Fn() -> impl Stream<Item = anyhow::Result<T>>` closure is a producer:
///
/// ```rust
/// use futures_util::stream;
/// use share_hub::Producer;
///
/// let producer = || stream::iter(vec![Ok::<u32, anyhow::Error>(1), Ok(2)]);
/// let _run = producer.activate();
/// ```
pub trait Producer<T>: Send + Sync + 'static {
    /// Start a new, independent run.
    fn activate(&self) -> ProducerStream<T>;
}

impl<T, F, S> Producer<T> for F
where
    F: Fn() -> S + Send + Sync + 'static,
    S: Stream<Item = anyhow::Result<T>> + Send + 'static,
{
    fn activate(&self) -> ProducerStream<T> {
        self().boxed()
    }
}

/// Counter producer emitting `0, 1, 2, ...` with `period` between items.
///
/// The first item is emitted immediately on activation. With `count = None`
/// the run never completes and only ends when the hub cancels it.
#[derive(Debug, Clone, Copy)]
pub struct Paced {
    count: Option<u64>,
    period: Duration,
}

/// Shorthand for [`Paced`] with a bounded item count.
pub fn paced(count: u64, period: Duration) -> Paced {
    Paced {
        count: Some(count),
        period,
    }
}

impl Paced {
    /// Run until cancelled.
    pub fn unbounded(period: Duration) -> Self {
        Self {
            count: None,
            period,
        }
    }
}

impl Producer<u64> for Paced {
    fn activate(&self) -> ProducerStream<u64> {
        let count = self.count;
        let period = self.period;
        tracing::debug!(?count, ?period, "Paced producer activated");

        stream::unfold(0u64, move |next| async move {
            if count.is_some_and(|count| next >= count) {
                tracing::debug!(emitted = next, "Paced producer completed");
                return None;
            }
            if next > 0 {
                tokio::time::sleep(period).await;
            }
            Some((Ok(next), next + 1))
        })
        .boxed()
    }
}
