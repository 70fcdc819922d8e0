//! Resilience Patterns Example
//!
//! Demonstrates the standalone primitives:
//! - RateLimiter pacing callers with FIFO waiters
//! - Semaphore bounding parallel work
//! - CircuitBreaker failing fast against a broken dependency
//! - Debouncer and Throttler coalescing noisy calls
//!
//! Usage:
//!   RUST_LOG=flowguard=info cargo run --example resilience_patterns

use flowguard::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Flowguard Resilience Patterns Demo ===\n");

    demo_rate_limiter().await?;
    demo_semaphore().await;
    demo_circuit_breaker().await;
    demo_timing().await;
    Ok(())
}

async fn demo_rate_limiter() -> anyhow::Result<()> {
    println!("--- Example 1: RateLimiter ---\n");

    let limiter = RateLimiter::new("5/second".parse()?);
    let start = Instant::now();
    for i in 0..8 {
        limiter.acquire().await?;
        println!("  request {} at {:>4} ms", i, start.elapsed().as_millis());
    }
    println!("  snapshot: {:?}\n", limiter.snapshot());
    Ok(())
}

async fn demo_semaphore() {
    println!("--- Example 2: Semaphore ---\n");

    let sem = Arc::new(create_semaphore(2));
    let handles: Vec<_> = (0..5)
        .map(|i| {
            let sem = Arc::clone(&sem);
            tokio::spawn(async move {
                sem.run(async {
                    println!("  job {} running ({} permits left)", i, sem.available());
                    tokio::time::sleep(Duration::from_millis(50)).await;
                })
                .await
            })
        })
        .collect();
    for h in handles {
        let _ = h.await;
    }
    println!("  snapshot: {:?}\n", sem.snapshot());
}

async fn demo_circuit_breaker() {
    println!("--- Example 3: CircuitBreaker ---\n");

    let breaker = create_circuit_breaker(
        CircuitBreakerConfig::new()
            .with_failure_threshold(3)
            .with_success_threshold(1)
            .with_reset_timeout(Duration::from_millis(200)),
    )
    .with_state_observer(|state| println!("  >> circuit is now {}", state));

    let healthy = &AtomicU32::new(0);
    for attempt in 0..8 {
        if attempt == 5 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            healthy.store(1, Ordering::SeqCst);
        }
        let res = breaker
            .execute(|| async move {
                if healthy.load(Ordering::SeqCst) == 1 {
                    Ok("pong")
                } else {
                    Err("connection refused")
                }
            })
            .await;
        match res {
            Ok(v) => println!("  call {}: {}", attempt, v),
            Err(CallError::Open { retry_after }) => {
                println!("  call {}: rejected, retry after {:?}", attempt, retry_after)
            }
            Err(CallError::Inner(e)) => println!("  call {}: failed: {}", attempt, e),
        }
    }
    println!();
}

async fn demo_timing() {
    println!("--- Example 4: debounce and throttle ---\n");

    let saves = Arc::new(AtomicU32::new(0));
    let s = Arc::clone(&saves);
    let autosave = debounce(
        move |doc: String| {
            s.fetch_add(1, Ordering::SeqCst);
            println!("  saved {:?}", doc);
        },
        Duration::from_millis(100),
    );
    for text in ["h", "he", "hel", "hello"] {
        autosave.call(text.to_string());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    println!("  {} save(s) for 4 edits", saves.load(Ordering::SeqCst));

    let report = throttle(
        |pct: u32| println!("  progress {}%", pct),
        Duration::from_millis(100),
    );
    for pct in (0..=100).step_by(5) {
        report.call(pct);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
}
