//! Subscriber handles and their delivery queues

use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::hub::Shared;

/// Identity of one attached subscriber, unique per hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why a subscriber stopped receiving.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The producer run was exhausted.
    Completed,
    /// The producer failed and the hub stopped sharing.
    Failed(HubError),
    /// The subscriber was detached from the hub.
    Detached,
    /// The hub was shut down.
    Closed,
}

/// Hub-side end of a subscriber: where the run task delivers items.
pub(crate) struct Mailbox<T> {
    pub(crate) tx: flume::Sender<T>,
    /// Kept so `DropOldest` can evict from the head of the queue.
    pub(crate) rx: flume::Receiver<T>,
    pub(crate) token: CancellationToken,
    outcome: Arc<Mutex<Option<Outcome>>>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            token: self.token.clone(),
            outcome: self.outcome.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> Mailbox<T> {
    pub(crate) fn new(capacity: usize, token: CancellationToken) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            token,
            outcome: Arc::new(Mutex::new(None)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record the terminal outcome (first one wins) and wake the subscriber.
    pub(crate) fn close(&self, outcome: Outcome) {
        {
            let mut slot = self.outcome.lock();
            if slot.is_none() {
                *slot = Some(outcome);
            }
        }
        self.token.cancel();
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// One consumer's view of a hub's output.
///
/// Yields the replay snapshot taken at attach time, then live items, then a
/// single terminal signal: `Ok(None)` for completion, detach or shutdown, and
/// `Err(HubError::ProducerFailure)` when the producer failed. Items already
/// queued are always delivered before the terminal signal.
///
/// Dropping a subscriber detaches it.
pub struct Subscriber<T: Clone + Send + 'static> {
    id: SubscriberId,
    replay: VecDeque<T>,
    rx: flume::Receiver<T>,
    token: CancellationToken,
    outcome: Arc<Mutex<Option<Outcome>>>,
    dropped: Arc<AtomicU64>,
    reported_dropped: u64,
    /// Terminal signal already returned; the queue is never read again.
    finished: bool,
    hub: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> {
    pub(crate) fn new(
        id: SubscriberId,
        replay: Vec<T>,
        mailbox: &Mailbox<T>,
        hub: Arc<Shared<T>>,
    ) -> Self {
        Self {
            id,
            replay: replay.into(),
            rx: mailbox.rx.clone(),
            token: mailbox.token.clone(),
            outcome: mailbox.outcome.clone(),
            dropped: mailbox.dropped.clone(),
            reported_dropped: 0,
            finished: false,
            hub,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next item.
    ///
    /// Returns `Ok(Some(item))`, `Ok(None)` once the subscriber is finished,
    /// or the terminal producer failure. Repeated calls after the end keep
    /// returning the same terminal signal.
    pub async fn recv(&mut self) -> Result<Option<T>, HubError> {
        if self.finished {
            return self.terminal();
        }
        if let Some(item) = self.replay.pop_front() {
            return Ok(Some(item));
        }

        tokio::select! {
            biased;
            received = self.rx.recv_async() => {
                if let Ok(item) = received {
                    self.report_overflow();
                    return Ok(Some(item));
                }
            }
            _ = self.token.cancelled() => {}
        }

        // Closed: drain whatever was queued before the terminal signal
        if let Ok(item) = self.rx.try_recv() {
            return Ok(Some(item));
        }

        self.report_overflow();
        self.finished = true;
        self.terminal()
    }

    fn terminal(&self) -> Result<Option<T>, HubError> {
        match self.outcome() {
            Some(Outcome::Failed(err)) => Err(err),
            _ => Ok(None),
        }
    }

    /// Next item if one is available right now.
    pub fn try_recv(&mut self) -> Option<T> {
        if self.finished {
            return None;
        }
        self.replay
            .pop_front()
            .or_else(|| self.rx.try_recv().ok())
    }

    /// Wait until the subscriber has been closed by the hub.
    pub async fn closed(&self) {
        self.token.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Terminal outcome, once closed.
    pub fn outcome(&self) -> Option<Outcome> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(self.outcome.lock().clone().unwrap_or(Outcome::Closed))
    }

    /// Items dropped for this subscriber by a drop overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// `Err(SubscriberOverflow)` if any item was dropped for this subscriber.
    pub fn overflow(&self) -> Result<(), HubError> {
        match self.dropped() {
            0 => Ok(()),
            dropped => Err(HubError::SubscriberOverflow { dropped }),
        }
    }

    /// Turn the subscriber into a [`Stream`] that ends after the terminal signal.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, HubError>> + Send + 'static {
        stream::unfold(Some(self), |subscriber| async move {
            let mut subscriber = subscriber?;
            match subscriber.recv().await {
                Ok(Some(item)) => Some((Ok(item), Some(subscriber))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    fn report_overflow(&mut self) {
        let dropped = self.dropped();
        if dropped > self.reported_dropped {
            tracing::warn!(
                subscriber = %self.id,
                "Subscriber lagged, skipped {} items",
                dropped - self.reported_dropped
            );
            self.reported_dropped = dropped;
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("replay_pending", &self.replay.len())
            .field("queued", &self.rx.len())
            .field("closed", &self.is_closed())
            .field("finished", &self.finished)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Drop for Subscriber<T> {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}
