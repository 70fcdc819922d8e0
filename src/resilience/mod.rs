//! 弹性模式模块：提供限流器、信号量和熔断器等并发与可靠性保障机制。
//!
//! # Resilience Primitives Module
//!
//! Building blocks that keep callers from overloading a downstream dependency and that fail
//! fast once the dependency is known to be unhealthy.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Token bucket with lazy refill and FIFO waiters |
//! | [`semaphore`] | Counting semaphore with FIFO permit hand-off |
//! | [`circuit_breaker`] | Closed / Open / Half-Open failure isolation |
//!
//! All three are safe to share across tasks. Waiters are served strictly in arrival order,
//! and a waiter whose future is dropped gives its slot back.
//!
//! ## Rate Limiter
//!
//! ```rust
//! use flowguard::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> flowguard::Result<()> {
//! let limiter = RateLimiter::new("2/second".parse::<RateLimiterConfig>()?);
//! assert!(limiter.try_acquire());
//! limiter.acquire().await?;
//! assert!(!limiter.try_acquire());
//! # Ok(())
//! # }
//! ```
//!
//! ## Semaphore
//!
//! ```rust
//! use flowguard::resilience::semaphore::Semaphore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sem = Semaphore::new(2);
//! let value = sem.run(async { 40 + 2 }).await;
//! assert_eq!(value, 42);
//! assert_eq!(sem.available(), 2);
//! # }
//! ```
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use flowguard::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(2)
//!         .with_reset_timeout(Duration::from_secs(30)),
//! );
//! breaker.on_failure();
//! breaker.on_failure();
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(breaker.allow().is_err());
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod semaphore;
mod waiter;

pub use circuit_breaker::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{parse_rate_limit, RateLimiter, RateLimiterConfig};
pub use semaphore::{Semaphore, SemaphorePermit};
