//! # Share Hub
//!
//! Turn a cold, restartable producer into a hot stream shared by many
//! subscribers.
//!
//! ## Features
//!
//! - **Single run**: At most one producer run is active, whatever the subscriber count
//! - **Replay**: The last `replay` items are handed to late subscribers
//! - **Start policies**: Eager, lazy with stop-on-idle, or lazy keep-alive
//! - **Backpressure**: Bounded per-subscriber queues with suspend or drop overflow
//! - **Failure policy**: Terminate sharing, or restart the producer with backoff
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use share_hub::{paced, Hub, HubConfig, StartPolicy};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = HubConfig {
//!         replay: 2,
//!         start: StartPolicy::Eager,
//!         ..HubConfig::default()
//!     };
//!     let hub: Hub<u64> = Hub::new(paced(5, Duration::from_millis(10)), config).unwrap();
//!
//!     // Late subscriber still gets the last two items
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!     let mut rx = hub.attach().unwrap();
//!
//!     while let Some(value) = rx.recv().await.unwrap() {
//!         println!("Received: {}", value);
//!     }
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod ext;
pub mod hub;
pub mod producer;
pub mod replay;
pub mod subscriber;

// Re-exports
pub use backoff::{BackoffPolicy, JitterPolicy};
pub use config::{FailurePolicy, HubConfig, IdleEmissions, OverflowPolicy, StartPolicy};
pub use error::HubError;
pub use ext::ShareIn;
pub use hub::{Hub, HubBuilder, HubState, HubStats};
pub use producer::{paced, Paced, Producer, ProducerStream};
pub use replay::ReplayBuffer;
pub use subscriber::{Outcome, Subscriber, SubscriberId};
