//! 时序控制模块：提供防抖与节流等调用合并原语。
//!
//! # Call Timing Module
//!
//! Wrappers that decide when a function actually runs, given how often it is called.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Debouncer`] | Runs once after calls stop for `delay`, with optional leading edge and `max_wait` |
//! | [`Throttler`] | Runs at most once per window; extra calls collapse into one trailing call |
//!
//! Deferred invocations run on spawned tokio tasks, so `call` must be used from inside a
//! runtime. The wrapped function itself is synchronous and is never invoked while an
//! internal lock is held.

pub mod debounce;
pub mod throttle;

pub use debounce::{DebounceConfig, Debouncer};
pub use throttle::Throttler;

use tokio::task::JoinHandle;

/// A scheduled deferred invocation. `id` tells a firing timer whether it is still current.
#[derive(Debug)]
pub(crate) struct Timer {
    pub(crate) id: u64,
    pub(crate) handle: JoinHandle<()>,
}

impl Timer {
    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}
