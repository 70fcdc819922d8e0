use crate::batch::{BatchConfig, BatchProcessor, ProcessOptions};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, Semaphore,
};
use crate::timing::{DebounceConfig, Debouncer, Throttler};
use crate::{Error, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;

pub fn create_batch_processor<In, Out, E, F, Fut>(
    task: F,
    config: BatchConfig,
) -> BatchProcessor<In, Out, E>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Out, E>> + Send + 'static,
{
    BatchProcessor::new(task, config)
}

/// `limit` tokens per `window`.
pub fn create_rate_limiter(limit: u32, window: Duration) -> RateLimiter {
    RateLimiter::new(RateLimiterConfig::new(limit, window))
}

pub fn create_semaphore(max_permits: usize) -> Semaphore {
    Semaphore::new(max_permits)
}

pub fn create_circuit_breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
    CircuitBreaker::new(config)
}

/// Trailing-edge debounce with the given quiet period.
pub fn debounce<A, R, F>(func: F, delay: Duration) -> Debouncer<A, R>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    Debouncer::new(func, DebounceConfig::new(delay))
}

pub fn debounce_with<A, R, F>(func: F, config: DebounceConfig) -> Debouncer<A, R>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    Debouncer::new(func, config)
}

pub fn throttle<A, R, F>(func: F, limit: Duration) -> Throttler<A, R>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    Throttler::new(func, limit)
}

/// Process `inputs` and return every output in completion order, or
/// [`Error::BatchFailed`] if any item failed.
pub async fn process_with_limit<In, Out, E, F, Fut, I>(
    inputs: I,
    task: F,
    config: BatchConfig,
) -> Result<Vec<Out>>
where
    I: IntoIterator<Item = In>,
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: fmt::Display + Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Out, E>> + Send + 'static,
{
    let outcome = BatchProcessor::new(task, config)
        .process(inputs, ProcessOptions::new())
        .await;
    if let Some(first) = outcome.failures.first() {
        return Err(Error::BatchFailed {
            failed: outcome.failures.len(),
            total: outcome.stats.total,
            first_error: first.error.to_string(),
        });
    }
    Ok(outcome.results)
}
