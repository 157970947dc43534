//! # Example: eager_replay
//!
//! An eager hub starts its producer straight away. Five items are emitted one
//! second apart while nobody listens; two subscribers arriving after the run
//! has finished still receive the last two items, then completion.
//!
//! ```text
//! t=0s  new()      ──► producer active, emits 0..4
//! t=6s  attach() x2 ──► replay [3, 4] ──► Completed
//! ```
//!
//! Run with `RUST_LOG=share_hub=debug cargo run --example eager_replay`.

use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use share_hub::{paced, Hub, HubConfig, StartPolicy, Subscriber};
use tracing_subscriber::EnvFilter;

async fn print_all(label: u32, mut subscriber: Subscriber<u64>) -> Result<()> {
    while let Some(value) = subscriber.recv().await? {
        println!("[{}] {} {}", label, Local::now().format("%H:%M:%S%.3f"), value);
    }
    println!("[{}] done ({:?})", label, subscriber.outcome());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = HubConfig {
        replay: 2,
        start: StartPolicy::Eager,
        ..HubConfig::default()
    };
    let hub: Hub<u64> = Hub::new(paced(5, Duration::from_secs(1)), config)?;
    println!("{} hub started", Local::now().format("%H:%M:%S%.3f"));

    tokio::time::sleep(Duration::from_secs(6)).await;

    let first = tokio::spawn(print_all(1, hub.attach()?));
    let second = tokio::spawn(print_all(2, hub.attach()?));
    first.await??;
    second.await??;

    println!("{}", serde_json::to_string_pretty(&hub.stats())?);
    hub.shutdown();
    Ok(())
}
