//! Minimal prelude for application code.

pub use crate::batch::{
    BatchConfig, BatchItem, BatchOutcome, BatchProcessor, ItemError, ItemStatus, ProcessOptions,
};
pub use crate::facade::factory::*;
pub use crate::resilience::{
    CallError, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter,
    RateLimiterConfig, Semaphore,
};
pub use crate::timing::{DebounceConfig, Debouncer, Throttler};
pub use crate::{Error, Result};
pub use tokio_util::sync::CancellationToken;
