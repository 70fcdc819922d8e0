use crate::config::duration_ms;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays open before a probe is let through.
    #[serde(rename = "reset_timeout_ms", with = "duration_ms")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the number of half-open successes required to close
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open-state duration
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum CallError<E> {
    /// Rejected without calling the operation.
    Open { retry_after: Duration },
    /// The operation's own error, unchanged.
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CallError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Inner(e) => Some(e),
            CallError::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Open { retry_after } => write!(
                f,
                "circuit breaker open (retry after {} ms)",
                retry_after.as_millis()
            ),
            CallError::Inner(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Inner(e) => Some(e),
            CallError::Open { .. } => None,
        }
    }
}

impl<E> From<CallError<E>> for Error
where
    E: Into<Error>,
{
    fn from(err: CallError<E>) -> Self {
        match err {
            CallError::Open { retry_after } => Error::CircuitOpen {
                retry_after_ms: retry_after.as_millis() as u64,
            },
            CallError::Inner(e) => e.into(),
        }
    }
}

type StateObserver = Arc<dyn Fn(CircuitState) + Send + Sync>;

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker with closed, open and half-open states.
///
/// - Counts consecutive failures while closed
/// - Fails fast while open; the first call after `reset_timeout` moves to half-open
/// - `success_threshold` half-open successes close it, any half-open failure reopens it
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
    on_state_change: Option<StateObserver>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("cfg", &self.cfg)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
            }),
            on_state_change: None,
        }
    }

    /// Register an observer invoked after every state transition.
    pub fn with_state_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, st: &mut State, to: CircuitState) -> Option<CircuitState> {
        if st.state == to {
            return None;
        }
        match to {
            CircuitState::Open => tracing::warn!(
                from = %st.state,
                failures = st.consecutive_failures,
                "circuit breaker opened"
            ),
            _ => tracing::info!(from = %st.state, to = %to, "circuit breaker state change"),
        }
        st.state = to;
        Some(to)
    }

    fn notify(&self, changed: Option<CircuitState>) {
        if let (Some(state), Some(observer)) = (changed, self.on_state_change.as_ref()) {
            observer(state);
        }
    }

    /// Current state without evaluating the reset timeout.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Gate a call. Moves open to half-open once the reset timeout has elapsed.
    pub fn allow(&self) -> Result<()> {
        let (res, changed) = {
            let mut st = self.lock();
            if st.state != CircuitState::Open {
                (Ok(()), None)
            } else {
                let elapsed = st
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(self.cfg.reset_timeout);
                if elapsed >= self.cfg.reset_timeout {
                    st.consecutive_successes = 0;
                    (Ok(()), self.transition(&mut st, CircuitState::HalfOpen))
                } else {
                    let remaining = self.cfg.reset_timeout - elapsed;
                    (
                        Err(Error::CircuitOpen {
                            retry_after_ms: remaining.as_millis() as u64,
                        }),
                        None,
                    )
                }
            }
        };
        self.notify(changed);
        res
    }

    pub fn on_success(&self) {
        let changed = {
            let mut st = self.lock();
            st.consecutive_failures = 0;
            if st.state == CircuitState::HalfOpen {
                st.consecutive_successes = st.consecutive_successes.saturating_add(1);
                if st.consecutive_successes >= self.cfg.success_threshold {
                    st.consecutive_successes = 0;
                    self.transition(&mut st, CircuitState::Closed)
                } else {
                    None
                }
            } else {
                None
            }
        };
        self.notify(changed);
    }

    pub fn on_failure(&self) {
        let changed = {
            let mut st = self.lock();
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            st.consecutive_successes = 0;
            st.last_failure = Some(Instant::now());
            match st.state {
                CircuitState::HalfOpen => self.transition(&mut st, CircuitState::Open),
                CircuitState::Closed if st.consecutive_failures >= self.cfg.failure_threshold => {
                    self.transition(&mut st, CircuitState::Open)
                }
                _ => None,
            }
        };
        self.notify(changed);
    }

    /// Run `op` through the breaker. Its error is returned unchanged as
    /// [`CallError::Inner`] after the failure has been counted.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Err(Error::CircuitOpen { retry_after_ms }) = self.allow() {
            return Err(CallError::Open {
                retry_after: Duration::from_millis(retry_after_ms),
            });
        }
        match op().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(CallError::Inner(e))
            }
        }
    }

    /// Force the circuit closed and clear both counters.
    pub fn reset(&self) {
        let changed = {
            let mut st = self.lock();
            st.consecutive_failures = 0;
            st.consecutive_successes = 0;
            st.last_failure = None;
            self.transition(&mut st, CircuitState::Closed)
        };
        self.notify(changed);
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.last_failure) {
            (CircuitState::Open, Some(t)) => {
                let elapsed = t.elapsed();
                (elapsed < self.cfg.reset_timeout)
                    .then(|| (self.cfg.reset_timeout - elapsed).as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            success_threshold: self.cfg.success_threshold,
            reset_timeout_ms: self.cfg.reset_timeout.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            consecutive_successes: st.consecutive_successes,
            open_remaining_ms,
        }
    }
}
