//! Sharing properties under a multi-threaded runtime

use futures_util::StreamExt;
use share_hub::{Hub, HubConfig, Paced, Producer, StartPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks how many producer runs are alive at once
#[derive(Clone, Default)]
struct RunTracker {
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

struct LiveRun(Arc<AtomicUsize>);

impl Drop for LiveRun {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RunTracker {
    fn producer(&self, period: Duration) -> impl Producer<u64> {
        let tracker = self.clone();
        move || {
            let now = tracker.live.fetch_add(1, Ordering::SeqCst) + 1;
            tracker.peak.fetch_max(now, Ordering::SeqCst);
            tracker.total.fetch_add(1, Ordering::SeqCst);

            let guard = LiveRun(tracker.live.clone());
            Paced::unbounded(period).activate().map(move |item| {
                let _alive = &guard;
                item
            })
        }
    }
}

fn assert_consecutive(items: &[u64]) {
    for pair in items.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "gap or duplicate in {:?}", items);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_run_under_attach_detach_churn() {
    let tracker = RunTracker::default();
    let hub = Hub::new(
        tracker.producer(Duration::from_millis(1)),
        HubConfig {
            start: StartPolicy::LazyStopOnIdle,
            replay: 2,
            ..HubConfig::default()
        },
    )
    .unwrap();

    let mut handles = Vec::new();
    for task in 0..8 {
        let hub = hub.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..20 {
                let mut subscriber = hub.attach().unwrap();
                if (task + round) % 3 == 0 {
                    let _ = subscriber.recv().await;
                }
                tokio::task::yield_now().await;
                drop(subscriber);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Let the last cancelled run finish tearing down
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.live.load(Ordering::SeqCst), 0);
    assert!(tracker.total.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_subscribers_see_gapless_sequences() {
    let tracker = RunTracker::default();
    let hub = Hub::new(
        tracker.producer(Duration::from_millis(1)),
        HubConfig {
            start: StartPolicy::Eager,
            replay: 3,
            ..HubConfig::default()
        },
    )
    .unwrap();

    let mut handles = Vec::new();
    for delay_ms in [0u64, 3, 7, 15] {
        let hub = hub.clone();
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            hub.attach()
                .unwrap()
                .into_stream()
                .take(25)
                .map(|item| item.unwrap())
                .collect::<Vec<u64>>()
                .await
        }));
    }

    let mut sequences = Vec::new();
    for handle in handles {
        let items = handle.await.unwrap();
        assert_eq!(items.len(), 25);
        assert_consecutive(&items);
        sequences.push(items);
    }

    // Overlapping windows agree on every shared item
    let last_start = sequences.iter().map(|s| s[0]).max().unwrap();
    let first_end = sequences.iter().map(|s| s[24]).min().unwrap();
    for value in last_start..=first_end {
        assert!(sequences.iter().all(|s| s.contains(&value)));
    }

    hub.shutdown();
    assert_eq!(tracker.total.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_subscribers_receive_identical_streams() {
    let (tx, rx) = flume::unbounded::<u64>();
    let producer = move || rx.clone().into_stream().map(Ok::<u64, anyhow::Error>);
    let hub = Hub::builder(producer)
        .start(StartPolicy::LazyKeepAlive)
        .queue_capacity(4)
        .build()
        .unwrap();

    let subscribers: Vec<_> = (0..5).map(|_| hub.attach().unwrap()).collect();

    // Feed only once everyone is registered; dropping the sender exhausts the run
    for item in 0..500u64 {
        tx.send(item).unwrap();
    }
    drop(tx);

    let handles: Vec<_> = subscribers
        .into_iter()
        .map(|subscriber| {
            tokio::spawn(async move {
                subscriber
                    .into_stream()
                    .map(|item| item.unwrap())
                    .collect::<Vec<u64>>()
                    .await
            })
        })
        .collect();

    let expected: Vec<u64> = (0..500).collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), expected);
    }
}
