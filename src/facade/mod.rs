//! Convenience facade.
//!
//! Short constructors for every primitive plus the one-shot [`process_with_limit`] helper.
//! Everything here is a thin wrapper; reach for the underlying types once you need their
//! full configuration.

pub mod factory;
pub mod prelude;

pub use factory::{
    create_batch_processor, create_circuit_breaker, create_rate_limiter, create_semaphore,
    debounce, debounce_with, process_with_limit, throttle,
};
