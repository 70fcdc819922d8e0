//! 批处理模块：以有界并发、重试与限流处理整批输入。
//!
//! # Batch Processing Module
//!
//! Runs one async task over every element of a collection while keeping at most
//! `concurrency` attempts in flight. Failed attempts are retried with exponential backoff,
//! an optional [`RateLimiter`](crate::resilience::RateLimiter) paces every attempt, and a
//! cancellation token aborts items that have not started yet.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchProcessor`] | Schedules items, retries failures, collects the outcome |
//! | [`BatchConfig`] | Concurrency, retry count, backoff base and rate limit |
//! | [`ProcessOptions`] | Abort signal plus progress and error callbacks for one run |
//! | [`BatchItem`] | Per-item status, attempts, output or error |
//! | [`BatchOutcome`] | Results, failures, duration and counters of a finished run |
//! | [`BatchStream`] | Resolved items delivered one by one as they finish |
//!
//! ## Example
//!
//! ```rust
//! use flowguard::batch::{BatchConfig, BatchProcessor, ProcessOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let processor = BatchProcessor::new(
//!     |n: u64| async move { Ok::<_, String>(n * n) },
//!     BatchConfig::new().with_concurrency(2),
//! );
//! let outcome = processor.process(1..=4, ProcessOptions::new()).await;
//! assert!(outcome.all_succeeded());
//! assert_eq!(outcome.stats.succeeded, 4);
//! # }
//! ```
//!
//! ## Retries
//!
//! `max_retries` is the total number of attempts. After attempt `k` fails the item sleeps
//! `retry_delay * 2^(k-1)` while keeping its concurrency slot, then goes to the back of the
//! queue so items that have not run yet get their turn first.

mod executor;
mod item;
mod stream;

pub use executor::{BatchConfig, BatchOutcome, BatchProcessor, BatchStats, ProcessOptions};
pub use item::{BatchFailure, BatchItem, ItemError, ItemStatus};
pub use stream::{BatchStream, StreamEvent};
