//! Extension trait for sharing a producer.
//!
//! Adds `share_in` to every [`Producer`], turning a cold producer into a hot
//! [`Hub`] in one call.

use crate::config::HubConfig;
use crate::error::HubError;
use crate::hub::Hub;
use crate::producer::Producer;

/// Extension trait for [`Producer`] that provides the `share_in` method.
pub trait ShareIn<T: Clone + Send + 'static>: Producer<T> + Sized {
    /// Share this producer through a new [`Hub`].
    ///
    /// ```
    /// use std::time::Duration;
    /// use share_hub::{paced, Hub, HubConfig, ShareIn, StartPolicy};
    ///
    /// # tokio_test::block_on(async {
    /// let config = HubConfig {
    ///     replay: 2,
    ///     start: StartPolicy::Eager,
    ///     ..HubConfig::default()
    /// };
    /// let hub: Hub<u64> = paced(5, Duration::from_millis(1)).share_in(config).unwrap();
    /// assert_eq!(hub.config().replay, 2);
    /// # });
    /// ```
    fn share_in(self, config: HubConfig) -> Result<Hub<T>, HubError> {
        Hub::new(self, config)
    }
}

impl<T, P> ShareIn<T> for P
where
    T: Clone + Send + 'static,
    P: Producer<T>,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartPolicy;
    use futures_util::stream;

    #[tokio::test]
    async fn test_share_in_trait_works() {
        let producer = || stream::iter(vec![Ok::<i32, anyhow::Error>(1), Ok(2), Ok(3)]);
        let config = HubConfig {
            start: StartPolicy::LazyKeepAlive,
            ..HubConfig::default()
        };

        let hub = producer.share_in(config).unwrap();
        let mut subscriber = hub.attach().unwrap();

        let mut received = Vec::new();
        while let Some(item) = subscriber.recv().await.unwrap() {
            received.push(item);
        }
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn test_share_in_outside_runtime_fails() {
        let producer = || stream::iter(vec![Ok::<i32, anyhow::Error>(1)]);
        let result = producer.share_in(HubConfig::default());
        assert!(matches!(result, Err(HubError::NoRuntime)));
    }
}
