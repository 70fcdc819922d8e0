//! # flowguard
//!
//! 面向异步服务的并发与资源控制工具集：限流、信号量、熔断、有界批处理以及防抖/节流。
//!
//! Concurrency and resource-control toolkit for async Rust services.
//!
//! ## Overview
//!
//! The crate bundles the small primitives an async service needs when it talks to a
//! dependency it must not overload: throttling throughput, bounding parallelism, failing
//! fast when the dependency is down, and running large batches of work with partial-failure
//! semantics. All primitives are `Send + Sync`, run on tokio, and read time from tokio's
//! clock so they can be tested deterministically with a paused runtime.
//!
//! ## Key Features
//!
//! - **Rate limiting**: token bucket with lazy refill and FIFO waiters, see [`resilience::RateLimiter`]
//! - **Bounded parallelism**: FIFO counting semaphore with RAII permits, see [`resilience::Semaphore`]
//! - **Fault isolation**: three-state circuit breaker, see [`resilience::CircuitBreaker`]
//! - **Batching**: bounded-concurrency processing with retries and streaming, see [`batch::BatchProcessor`]
//! - **Call timing**: debounce and throttle wrappers in [`timing`]
//!
//! ## Quick Start
//!
//! ```rust
//! use flowguard::batch::{BatchConfig, BatchProcessor, ProcessOptions};
//! use flowguard::resilience::RateLimiterConfig;
//!
//! #[tokio::main]
//! async fn main() -> flowguard::Result<()> {
//!     let config = BatchConfig::new()
//!         .with_concurrency(4)
//!         .with_max_retries(2)
//!         .with_rate_limit("50/second".parse::<RateLimiterConfig>()?);
//!
//!     let processor = BatchProcessor::new(
//!         |id: u32| async move { Ok::<_, String>(format!("record-{}", id)) },
//!         config,
//!     );
//!     let outcome = processor.process(0..10, ProcessOptions::new()).await;
//!     assert_eq!(outcome.stats.succeeded, 10);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Rate limiter, semaphore and circuit breaker |
//! | [`batch`] | Bounded-concurrency batch processor and its streaming form |
//! | [`timing`] | Debouncer and throttler |
//! | [`config`] | File and environment configuration |
//! | [`facade`] | Factory functions and a prelude |
//! | [`error`] | Error types |

pub mod batch;
pub mod config;
pub mod error;
pub mod facade;
pub mod resilience;
pub mod timing;

pub use batch::{BatchConfig, BatchOutcome, BatchProcessor, ProcessOptions};
pub use config::ToolkitConfig;
pub use error::{Error, ErrorContext};
pub use facade::prelude;
pub use resilience::{CircuitBreaker, RateLimiter, Semaphore};
pub use timing::{Debouncer, Throttler};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
