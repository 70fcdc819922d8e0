//! Batch Processing Example
//!
//! Demonstrates the bounded-concurrency batch processor:
//! - BatchConfig for concurrency, retries and rate limiting
//! - ProcessOptions with progress and error callbacks
//! - Streaming results as they resolve
//! - Aborting a batch with a cancellation token
//!
//! Usage:
//!   RUST_LOG=flowguard=debug cargo run --example batch_processing

use flowguard::prelude::*;
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Pretend remote lookup: slow for big ids, flaky for multiples of seven.
async fn fetch_record(id: u32, flaky: Arc<AtomicU32>) -> std::result::Result<String, String> {
    tokio::time::sleep(Duration::from_millis(20 + u64::from(id % 5) * 10)).await;
    if id % 7 == 0 && flaky.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
        return Err(format!("record {} timed out", id));
    }
    if id == 13 {
        return Err("record 13 does not exist".to_string());
    }
    Ok(format!("record-{}", id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Flowguard Batch Processing Demo ===\n");

    demo_process().await?;
    demo_stream().await;
    demo_abort().await;
    Ok(())
}

async fn demo_process() -> anyhow::Result<()> {
    println!("--- Example 1: process() with retries and a rate limit ---\n");

    let flaky = Arc::new(AtomicU32::new(0));
    let config = BatchConfig::new()
        .with_concurrency(4)
        .with_max_retries(3)
        .with_retry_delay(Duration::from_millis(50))
        .with_rate_limit("40/second".parse()?);
    let processor = create_batch_processor(
        move |id: u32| fetch_record(id, Arc::clone(&flaky)),
        config,
    );

    let opts = ProcessOptions::new()
        .on_progress(|done, total, item: &BatchItem<u32, String, String>| {
            println!("  [{:>2}/{}] item {} ok after {} attempt(s)", done, total, item.id, item.attempts);
        })
        .on_error(|err, item| {
            println!("  item {} failed: {}", item.id, err);
            true
        });

    let outcome = processor.process(1..=20, opts).await;
    println!(
        "\nsucceeded={} failed={} retries={} in {:?} (success rate {:.0}%)\n",
        outcome.stats.succeeded,
        outcome.stats.failed,
        outcome.stats.retries,
        outcome.duration,
        outcome.success_rate() * 100.0
    );
    Ok(())
}

async fn demo_stream() {
    println!("--- Example 2: stream() ---\n");

    let processor = BatchProcessor::new(
        |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(ms)
        },
        BatchConfig::new().with_concurrency(3),
    );
    let mut stream = processor.stream(vec![120, 40, 80, 10, 60], ProcessOptions::new());
    while let Some(event) = stream.next().await {
        println!(
            "  {}/{} resolved: slept {:?} ms",
            event.completed, event.total, event.item.output
        );
    }
    println!();
}

async fn demo_abort() {
    println!("--- Example 3: abort ---\n");

    let token = CancellationToken::new();
    let processor = BatchProcessor::new(
        |n: u32| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(n)
        },
        BatchConfig::new().with_concurrency(2),
    );

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let outcome = processor
        .process(0..10u32, ProcessOptions::new().with_signal(token))
        .await;
    let aborted = outcome.failures.iter().filter(|f| f.error.is_aborted()).count();
    println!(
        "  finished {} items, {} aborted before starting\n",
        outcome.results.len(),
        aborted
    );
}
