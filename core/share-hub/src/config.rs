//! Hub configuration and sharing policies
//!
//! Every knob has a default, so an empty TOML document is a valid config:
//!
//! ```rust
//! use share_hub::{HubConfig, StartPolicy};
//!
//! let config = HubConfig::from_toml_str(r#"
//!     replay = 2
//!     start = "eager"
//! "#).unwrap();
//!
//! assert_eq!(config.replay, 2);
//! assert_eq!(config.start, StartPolicy::Eager);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::HubError;

/// Default per-subscriber delivery queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// When the producer run starts and stops relative to subscriber presence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Start on construction and never stop, even with zero subscribers.
    Eager,
    /// Start on first attach, stop when the last subscriber detaches.
    #[default]
    LazyStopOnIdle,
    /// Start on first attach and keep running afterwards.
    LazyKeepAlive,
}

impl StartPolicy {
    pub fn is_lazy(&self) -> bool {
        !matches!(self, StartPolicy::Eager)
    }
}

/// What the producer does when a subscriber's delivery queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the subscriber to make room. No item is lost.
    #[default]
    SuspendProducer,
    /// Evict the oldest queued item.
    DropOldest,
    /// Discard the incoming item.
    DropNewest,
}

/// What the hub does when the producer fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deliver the failure to every subscriber and close the hub.
    #[default]
    Terminate,
    /// Re-activate the producer after a backoff delay.
    ///
    /// `max_restarts = None` retries forever. Once the budget is spent the
    /// failure is handled as [`FailurePolicy::Terminate`].
    Restart {
        #[serde(default)]
        backoff: BackoffPolicy,
        #[serde(default)]
        max_restarts: Option<u32>,
    },
}

/// Handling of items emitted while no subscriber is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleEmissions {
    /// Record them in the replay buffer (subject to its capacity).
    #[default]
    Buffer,
    /// Drop them without recording.
    Discard,
}

/// Full configuration for a [`Hub`](crate::Hub).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Number of most recent items replayed to new subscribers.
    pub replay: usize,
    pub start: StartPolicy,
    pub overflow: OverflowPolicy,
    /// Capacity of each subscriber's delivery queue.
    pub queue_capacity: usize,
    pub on_failure: FailurePolicy,
    pub idle_emissions: IdleEmissions,
    /// Grace period before a `LazyStopOnIdle` hub stops an unwatched run.
    #[serde(rename = "stop_timeout_ms", with = "millis")]
    pub stop_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            replay: 0,
            start: StartPolicy::default(),
            overflow: OverflowPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            on_failure: FailurePolicy::default(),
            idle_emissions: IdleEmissions::default(),
            stop_timeout: Duration::ZERO,
        }
    }
}

impl HubConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, HubError> {
        let config: HubConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HubError> {
        if self.queue_capacity == 0 {
            return Err(HubError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        if let FailurePolicy::Restart { backoff, .. } = &self.on_failure {
            if !backoff.factor.is_finite() || backoff.factor < 1.0 {
                return Err(HubError::InvalidConfig(format!(
                    "backoff factor must be >= 1.0, got {}",
                    backoff.factor
                )));
            }
        }

        Ok(())
    }
}

/// Durations as integer milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
