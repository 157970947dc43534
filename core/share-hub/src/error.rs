//! Error types for hubs and subscribers

use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a [`Hub`](crate::Hub) or delivered to its subscribers.
///
/// `HubError` is `Clone` so a single producer failure can be handed to every
/// attached subscriber as its terminal signal.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum HubError {
    /// The hub was shut down; no further attaches are accepted.
    #[error("hub is closed")]
    HubClosed,

    /// The producer's generation logic failed.
    #[error("producer failed: {0}")]
    ProducerFailure(Arc<anyhow::Error>),

    /// Items were dropped for a slow subscriber under a drop overflow policy.
    #[error("subscriber overflowed, {dropped} items dropped")]
    SubscriberOverflow { dropped: u64 },

    /// The hub was constructed outside a tokio runtime.
    #[error("no tokio runtime available to drive the producer")]
    NoRuntime,

    /// Configuration values are out of range.
    #[error("invalid hub config: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed.
    #[error("failed to parse hub config: {0}")]
    Config(#[from] toml::de::Error),
}

impl HubError {
    pub(crate) fn producer(err: anyhow::Error) -> Self {
        HubError::ProducerFailure(Arc::new(err))
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            HubError::HubClosed => "hub_closed",
            HubError::ProducerFailure(_) => "producer_failure",
            HubError::SubscriberOverflow { .. } => "subscriber_overflow",
            HubError::NoRuntime => "no_runtime",
            HubError::InvalidConfig(_) => "invalid_config",
            HubError::Config(_) => "config",
        }
    }
}
