//! Broadcast hub: one producer run shared by many subscribers
//!
//! ## Run lifecycle
//! ```text
//! Idle ──attach (lazy)/new (eager)──► Starting ──first item──► Active
//!   ▲                                                           │
//!   └──────── cleanup ◄── Stopping ◄── exhausted / last detach ─┘
//!
//! any state ──shutdown() or terminal failure──► Closed
//! ```
//!
//! ## Rules
//! - At most one producer run is active: every run holds the activation gate
//!   for its whole lifetime, and emissions from a superseded run are ignored
//! - The replay buffer and registry only change under the state lock, which is
//!   never held across an await
//! - Replay snapshot and registration happen in the same critical section, so a
//!   new subscriber sees every item exactly once

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::config::{
    FailurePolicy, HubConfig, IdleEmissions, OverflowPolicy, StartPolicy,
};
use crate::error::HubError;
use crate::producer::Producer;
use crate::replay::ReplayBuffer;
use crate::subscriber::{Mailbox, Outcome, Subscriber, SubscriberId};

/// Start-policy state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Idle,
    Starting,
    Active,
    Stopping,
    Closed,
}

/// Point-in-time view of a hub.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub state: HubState,
    pub subscribers: usize,
    pub replay_len: usize,
    pub emitted: u64,
    pub dropped: u64,
    pub runs_started: u64,
    pub restarts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    dropped: AtomicU64,
    runs_started: AtomicU64,
    restarts: AtomicU64,
}

/// How a producer run ended
enum RunEnd {
    Exhausted,
    Failed(HubError),
    Cancelled,
}

struct Run {
    generation: u64,
    token: CancellationToken,
}

struct State<T> {
    phase: HubState,
    replay: ReplayBuffer<T>,
    subscribers: HashMap<SubscriberId, Mailbox<T>>,
    run: Option<Run>,
    generation: u64,
    /// Eager run already exhausted; late subscribers get replay then completion.
    completed: bool,
    idle_stop: Option<CancellationToken>,
}

impl<T> State<T> {
    fn is_current(&self, generation: u64) -> bool {
        self.run.as_ref().map(|run| run.generation) == Some(generation)
    }
}

pub(crate) struct Shared<T> {
    producer: Box<dyn Producer<T>>,
    config: HubConfig,
    runtime: Handle,
    /// Parent of every run and subscriber token.
    root: CancellationToken,
    /// Held by a run for its whole lifetime.
    gate: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<State<T>>,
    counters: Counters,
    next_id: AtomicU64,
}

/// Shares a single run of a cold [`Producer`] with any number of subscribers.
///
/// Cloning a `Hub` is cheap and every clone refers to the same run. When the
/// last clone is dropped the hub shuts down.
///
/// ```rust
/// use std::time::Duration;
/// use share_hub::{paced, Hub, StartPolicy};
///
/// # tokio_test::block_on(async {
/// let hub: Hub<u64> = Hub::builder(paced(3, Duration::from_millis(1)))
///     .start(StartPolicy::LazyKeepAlive)
///     .replay(1)
///     .build()
///     .unwrap();
///
/// let mut subscriber = hub.attach().unwrap();
/// assert_eq!(subscriber.recv().await.unwrap(), Some(0));
/// assert_eq!(subscriber.recv().await.unwrap(), Some(1));
/// assert_eq!(subscriber.recv().await.unwrap(), Some(2));
/// assert_eq!(subscriber.recv().await.unwrap(), None);
/// # });
/// ```
pub struct Hub<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
    _guard: Arc<DropGuard>,
}

impl<T: Clone + Send + 'static> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _guard: self._guard.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Hub<T> {
    /// Create a hub. Must be called from within a tokio runtime.
    ///
    /// An [`StartPolicy::Eager`] hub activates its producer immediately.
    pub fn new(producer: impl Producer<T>, config: HubConfig) -> Result<Self, HubError> {
        Self::from_boxed(Box::new(producer), config)
    }

    fn from_boxed(producer: Box<dyn Producer<T>>, config: HubConfig) -> Result<Self, HubError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let root = CancellationToken::new();
        let replay = ReplayBuffer::new(config.replay);

        let shared = Arc::new(Shared {
            producer,
            config,
            runtime,
            root: root.clone(),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(State {
                phase: HubState::Idle,
                replay,
                subscribers: HashMap::new(),
                run: None,
                generation: 0,
                completed: false,
                idle_stop: None,
            }),
            counters: Counters::default(),
            next_id: AtomicU64::new(1),
        });

        {
            let mut state = shared.state.lock();
            if shared.config.start == StartPolicy::Eager {
                shared.start_run(&mut state);
            }
        }

        debug!(
            replay = shared.config.replay,
            start = ?shared.config.start,
            overflow = ?shared.config.overflow,
            "Created hub"
        );

        Ok(Self {
            shared,
            _guard: Arc::new(root.drop_guard()),
        })
    }

    /// Fluent construction starting from default config.
    pub fn builder(producer: impl Producer<T>) -> HubBuilder<T> {
        HubBuilder {
            producer: Box::new(producer),
            config: HubConfig::default(),
        }
    }

    /// Register a new subscriber.
    ///
    /// The subscriber first receives the replay buffer as it is at this instant,
    /// then every later emission. Lazy hubs start their producer here.
    pub fn attach(&self) -> Result<Subscriber<T>, HubError> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if state.phase == HubState::Closed || shared.root.is_cancelled() {
            return Err(HubError::HubClosed);
        }

        let id = SubscriberId(shared.next_id.fetch_add(1, Ordering::Relaxed));
        let mailbox = Mailbox::new(shared.config.queue_capacity, shared.root.child_token());
        let subscriber = Subscriber::new(id, state.replay.snapshot(), &mailbox, shared.clone());

        if state.completed {
            debug!(subscriber = %id, "Attached to completed hub, replay only");
            mailbox.close(Outcome::Completed);
            return Ok(subscriber);
        }

        state.subscribers.insert(id, mailbox);
        if let Some(timer) = state.idle_stop.take() {
            timer.cancel();
        }
        if state.phase == HubState::Idle && shared.config.start.is_lazy() {
            shared.start_run(&mut state);
        }

        debug!(
            subscriber = %id,
            subscribers = state.subscribers.len(),
            replayed = state.replay.len(),
            "Subscriber attached"
        );
        Ok(subscriber)
    }

    /// Remove a subscriber. Detaching twice is a no-op.
    pub fn detach(&self, subscriber: &Subscriber<T>) {
        self.shared.detach(subscriber.id());
    }

    pub fn detach_id(&self, id: SubscriberId) {
        self.shared.detach(id);
    }

    /// Cancel the producer run, close every subscriber and reject later
    /// attaches with [`HubError::HubClosed`]. Calling it again does nothing.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.phase == HubState::Closed {
            debug!("Hub already closed");
            return;
        }
        info!(subscribers = state.subscribers.len(), "Shutting down hub");
        self.shared.close(&mut state, Outcome::Closed);
    }

    pub fn state(&self) -> HubState {
        self.shared.state.lock().phase
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Current replay buffer contents, oldest first.
    pub fn replay_snapshot(&self) -> Vec<T> {
        self.shared.state.lock().replay.snapshot()
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> HubStats {
        let (state, subscribers, replay_len) = {
            let state = self.shared.state.lock();
            (state.phase, state.subscribers.len(), state.replay.len())
        };
        let counters = &self.shared.counters;

        HubStats {
            state,
            subscribers,
            replay_len,
            emitted: counters.emitted.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            runs_started: counters.runs_started.load(Ordering::Relaxed),
            restarts: counters.restarts.load(Ordering::Relaxed),
        }
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn start_run(self: &Arc<Self>, state: &mut State<T>) {
        state.generation += 1;
        let generation = state.generation;
        let token = self.root.child_token();

        state.run = Some(Run {
            generation,
            token: token.clone(),
        });
        state.phase = if self.config.start == StartPolicy::Eager {
            HubState::Active
        } else {
            HubState::Starting
        };
        self.counters.runs_started.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            shared.drive(generation, token).await;
        });
    }

    /// Owns one run from activation to teardown, including restarts.
    async fn drive(self: Arc<Self>, generation: u64, token: CancellationToken) {
        // Previous run must be fully torn down before the producer is activated again
        let _gate = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.finish(generation, RunEnd::Cancelled);
                return;
            }
            guard = self.gate.clone().lock_owned() => guard,
        };

        let mut restarts = 0u32;
        let end = loop {
            info!(generation, restarts, "Activating producer");
            let end = self.run_once(generation, &token).await;

            let err = match end {
                RunEnd::Failed(err) => err,
                other => break other,
            };
            let Some(delay) = self.restart_delay(restarts) else {
                break RunEnd::Failed(err);
            };

            warn!(
                generation,
                attempt = restarts + 1,
                delay_ms = delay.as_millis() as u64,
                "Producer failed, restarting: {}",
                err
            );
            restarts += 1;
            self.counters.restarts.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                biased;
                _ = token.cancelled() => break RunEnd::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.finish(generation, end);
    }

    async fn run_once(&self, generation: u64, token: &CancellationToken) -> RunEnd {
        let mut run = self.producer.activate();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return RunEnd::Cancelled,
                next = run.next() => next,
            };

            match next {
                Some(Ok(item)) => {
                    if !self.emit(generation, token, item).await {
                        return RunEnd::Cancelled;
                    }
                }
                Some(Err(err)) => return RunEnd::Failed(HubError::producer(err)),
                None => return RunEnd::Exhausted,
            }
        }
    }

    fn restart_delay(&self, restarts: u32) -> Option<Duration> {
        match self.config.on_failure {
            FailurePolicy::Terminate => None,
            FailurePolicy::Restart {
                backoff,
                max_restarts,
            } => {
                if max_restarts.is_some_and(|max| restarts >= max) {
                    return None;
                }
                Some(backoff.next(restarts))
            }
        }
    }

    /// Record and fan out one item. Returns `false` once the run is no longer current.
    async fn emit(&self, generation: u64, token: &CancellationToken, item: T) -> bool {
        let targets: Vec<Mailbox<T>> = {
            let mut state = self.state.lock();
            if !state.is_current(generation) || token.is_cancelled() {
                return false;
            }

            if state.phase == HubState::Starting {
                state.phase = HubState::Active;
                debug!(generation, "Hub active");
            }

            let unwatched = state.subscribers.is_empty();
            if !(unwatched && self.config.idle_emissions == IdleEmissions::Discard) {
                state.replay.push(item.clone());
            }
            self.counters.emitted.fetch_add(1, Ordering::Relaxed);

            state.subscribers.values().cloned().collect()
        };

        for mailbox in targets {
            // Detached or closed since the snapshot was taken
            if mailbox.token.is_cancelled() {
                continue;
            }
            match self.config.overflow {
                OverflowPolicy::SuspendProducer => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return false,
                        _ = mailbox.token.cancelled() => {}
                        _ = mailbox.tx.send_async(item.clone()) => {}
                    }
                }
                OverflowPolicy::DropNewest => {
                    if let Err(flume::TrySendError::Full(_)) = mailbox.tx.try_send(item.clone()) {
                        self.record_drop(&mailbox);
                    }
                }
                OverflowPolicy::DropOldest => {
                    let mut pending = item.clone();
                    loop {
                        match mailbox.tx.try_send(pending) {
                            Ok(()) | Err(flume::TrySendError::Disconnected(_)) => break,
                            Err(flume::TrySendError::Full(back)) => {
                                if mailbox.rx.try_recv().is_ok() {
                                    self.record_drop(&mailbox);
                                }
                                pending = back;
                            }
                        }
                    }
                }
            }
        }

        true
    }

    fn record_drop(&self, mailbox: &Mailbox<T>) {
        mailbox.record_drop();
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, generation: u64, end: RunEnd) {
        let mut state = self.state.lock();
        if !state.is_current(generation) || state.phase == HubState::Closed {
            debug!(generation, "Superseded run finished");
            return;
        }

        match end {
            RunEnd::Exhausted => {
                // Subscribers that attached after the last item but before this
                // point belong to the finished run: they complete with it and
                // do not trigger a new one.
                state.phase = HubState::Stopping;
                state.run = None;
                let subscribers = state.subscribers.len();
                for (_, mailbox) in state.subscribers.drain() {
                    mailbox.close(Outcome::Completed);
                }
                if self.config.start.is_lazy() {
                    state.replay.clear();
                } else {
                    state.completed = true;
                }
                state.phase = HubState::Idle;
                info!(generation, subscribers, "Producer exhausted");
            }
            RunEnd::Failed(err) => {
                error!(generation, "Producer failed, closing hub: {}", err);
                self.close(&mut state, Outcome::Failed(err));
            }
            RunEnd::Cancelled => {
                // Only reachable while current when every hub handle was dropped
                debug!(generation, "Run cancelled with hub");
                self.close(&mut state, Outcome::Closed);
            }
        }
    }

    /// Terminal transition. Caller holds the state lock.
    fn close(&self, state: &mut State<T>, outcome: Outcome) {
        state.phase = HubState::Closed;
        if let Some(run) = state.run.take() {
            run.token.cancel();
        }
        if let Some(timer) = state.idle_stop.take() {
            timer.cancel();
        }
        for (_, mailbox) in state.subscribers.drain() {
            mailbox.close(outcome.clone());
        }
        self.root.cancel();
    }

    pub(crate) fn detach(self: &Arc<Self>, id: SubscriberId) {
        let mut state = self.state.lock();
        let Some(mailbox) = state.subscribers.remove(&id) else {
            return;
        };
        mailbox.close(Outcome::Detached);
        debug!(subscriber = %id, remaining = state.subscribers.len(), "Subscriber detached");

        if state.subscribers.is_empty()
            && state.run.is_some()
            && self.config.start == StartPolicy::LazyStopOnIdle
        {
            if self.config.stop_timeout.is_zero() {
                self.stop_run(&mut state);
            } else {
                self.schedule_idle_stop(&mut state);
            }
        }
    }

    fn stop_run(&self, state: &mut State<T>) {
        state.phase = HubState::Stopping;
        if let Some(run) = state.run.take() {
            run.token.cancel();
            info!(generation = run.generation, "No subscribers left, producer stopped");
        }
        state.replay.clear();
        state.phase = HubState::Idle;
    }

    fn schedule_idle_stop(self: &Arc<Self>, state: &mut State<T>) {
        let Some(generation) = state.run.as_ref().map(|run| run.generation) else {
            return;
        };
        let timer = self.root.child_token();
        if let Some(previous) = state.idle_stop.replace(timer.clone()) {
            previous.cancel();
        }

        let delay = self.config.stop_timeout;
        debug!(generation, delay_ms = delay.as_millis() as u64, "Idle stop scheduled");

        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let mut state = shared.state.lock();
                    if state.subscribers.is_empty() && state.is_current(generation) {
                        shared.stop_run(&mut state);
                    }
                }
            }
        });
    }
}

/// Fluent builder for [`Hub`].
pub struct HubBuilder<T> {
    producer: Box<dyn Producer<T>>,
    config: HubConfig,
}

impl<T: Clone + Send + 'static> HubBuilder<T> {
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    pub fn replay(mut self, replay: usize) -> Self {
        self.config.replay = replay;
        self
    }

    pub fn start(mut self, start: StartPolicy) -> Self {
        self.config.start = start;
        self
    }

    pub fn overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.config.overflow = overflow;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.config.on_failure = policy;
        self
    }

    pub fn idle_emissions(mut self, idle: IdleEmissions) -> Self {
        self.config.idle_emissions = idle;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Hub<T>, HubError> {
        Hub::from_boxed(self.producer, self.config)
    }
}
