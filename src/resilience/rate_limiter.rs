use super::waiter::{grant_next, Grant, GrantSender};
use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

static RATE_LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s*/\s*(\d*)\s*([A-Za-z]+)\s*$").expect("rate limit pattern is valid")
});

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub limit: u32,
    pub window_ms: u64,
    pub tokens: f64,
    /// Number of callers parked in `acquire()`.
    pub waiting: usize,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

/// `limit` operations per `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Set the bucket size (operations per window)
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the refill window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Tokens added per millisecond.
    pub fn refill_rate(&self) -> f64 {
        self.effective_limit() as f64 / self.effective_window_ms()
    }

    fn effective_limit(&self) -> u32 {
        self.limit.max(1)
    }

    fn effective_window_ms(&self) -> f64 {
        (self.window.as_secs_f64() * 1000.0).max(1.0)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(10)
    }
}

/// Parse strings such as `"100/minute"`, `"5/s"` or `"10/30s"` into a limiter config.
pub fn parse_rate_limit(input: &str) -> Result<RateLimiterConfig> {
    let invalid = |details: &str| {
        Error::configuration_with_context(
            format!("invalid rate limit '{}'", input),
            ErrorContext::new()
                .with_details(details)
                .with_source("rate_limiter"),
        )
    };

    let caps = RATE_LIMIT_RE
        .captures(input)
        .ok_or_else(|| invalid("expected '<limit>/<unit>', e.g. '100/minute'"))?;

    let limit: u32 = caps[1]
        .parse()
        .map_err(|_| invalid("limit does not fit in u32"))?;
    if limit == 0 {
        return Err(invalid("limit must be at least 1"));
    }

    let multiplier: u64 = match &caps[2] {
        "" => 1,
        n => n
            .parse()
            .ok()
            .filter(|m| *m > 0)
            .ok_or_else(|| invalid("window multiplier must be at least 1"))?,
    };

    let unit_secs: u64 = match caps[3].to_ascii_lowercase().as_str() {
        "s" | "sec" | "second" | "seconds" => 1,
        "m" | "min" | "minute" | "minutes" => 60,
        "h" | "hr" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        _ => return Err(invalid("unit must be one of second, minute, hour, day")),
    };

    Ok(RateLimiterConfig::new(
        limit,
        Duration::from_secs(unit_secs.saturating_mul(multiplier)),
    ))
}

impl FromStr for RateLimiterConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_rate_limit(s)
    }
}

#[derive(Serialize, Deserialize)]
struct RateLimitTable {
    limit: u32,
    window_ms: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RateLimitRepr {
    Text(String),
    Table(RateLimitTable),
}

impl Serialize for RateLimiterConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RateLimitTable {
            limit: self.limit,
            window_ms: self.window.as_millis() as u64,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RateLimiterConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RateLimitRepr::deserialize(deserializer)? {
            RateLimitRepr::Text(s) => parse_rate_limit(&s).map_err(serde::de::Error::custom),
            RateLimitRepr::Table(t) => Ok(Self::new(t.limit, Duration::from_millis(t.window_ms))),
        }
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<GrantSender>,
    /// A drain task is alive and owns serving `waiters`.
    draining: bool,
}

#[derive(Debug)]
struct Shared {
    max_tokens: f64,
    /// Tokens per millisecond.
    refill_rate: f64,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill_locked(&self, st: &mut State) {
        let now = Instant::now();
        let elapsed_ms = now.saturating_duration_since(st.last_refill).as_secs_f64() * 1000.0;
        if elapsed_ms > 0.0 {
            st.tokens = (st.tokens + elapsed_ms * self.refill_rate).min(self.max_tokens);
            st.last_refill = now;
        }
    }

    fn wait_for_next_token(&self, st: &State) -> Duration {
        let missing = (1.0 - st.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.refill_rate / 1000.0).max(Duration::from_millis(1))
    }

    fn refund(&self) {
        let mut st = self.lock();
        st.tokens = (st.tokens + 1.0).min(self.max_tokens);
    }
}

/// Token-bucket rate limiter with FIFO waiters.
///
/// - Refill is computed lazily on every access instead of by a ticking timer
/// - Callers never overtake queued waiters, so `try_acquire` fails while anyone is waiting
/// - Cloning yields another handle to the same bucket
#[derive(Debug, Clone)]
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    shared: Arc<Shared>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let max_tokens = cfg.effective_limit() as f64;
        let shared = Arc::new(Shared {
            max_tokens,
            refill_rate: cfg.refill_rate(),
            state: Mutex::new(State {
                tokens: max_tokens,
                last_refill: Instant::now(),
                waiters: VecDeque::new(),
                draining: false,
            }),
        });
        Self { cfg, shared }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    /// Acquire one token, waiting in FIFO order when the bucket is empty.
    ///
    /// Fails only if [`RateLimiter::reset`] clears the queue while this caller waits.
    pub async fn acquire(&self) -> Result<()> {
        let rx = {
            let mut st = self.shared.lock();
            self.shared.refill_locked(&mut st);

            if st.waiters.is_empty() && st.tokens >= 1.0 {
                st.tokens -= 1.0;
                return Ok(());
            }

            let (tx, rx) = tokio::sync::oneshot::channel();
            st.waiters.push_back(tx);
            tracing::trace!(waiting = st.waiters.len(), "rate limiter empty, queueing caller");
            if !st.draining {
                st.draining = true;
                tokio::spawn(drain(Arc::clone(&self.shared)));
            }
            rx
        };

        let shared = Arc::clone(&self.shared);
        Grant::new(rx, move || shared.refund())
            .wait()
            .await
            .map_err(|_| {
                Error::runtime_with_context(
                    "rate limiter reset while waiting",
                    ErrorContext::new().with_source("rate_limiter"),
                )
            })
    }

    /// Try to acquire a token without waiting, returns true if successful
    pub fn try_acquire(&self) -> bool {
        let mut st = self.shared.lock();
        self.shared.refill_locked(&mut st);
        if st.waiters.is_empty() && st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently in the bucket.
    pub fn available(&self) -> u32 {
        let mut st = self.shared.lock();
        self.shared.refill_locked(&mut st);
        st.tokens.floor() as u32
    }

    /// Refill the bucket and release every queued waiter with an error.
    pub fn reset(&self) {
        let mut st = self.shared.lock();
        st.tokens = self.shared.max_tokens;
        st.last_refill = Instant::now();
        st.waiters.clear();
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut st = self.shared.lock();
        self.shared.refill_locked(&mut st);
        let estimated_wait_ms = if st.tokens < 1.0 || !st.waiters.is_empty() {
            let queued = st.waiters.len() as f64;
            let missing = (1.0 - st.tokens).max(0.0) + queued;
            Some((missing / self.shared.refill_rate).ceil() as u64)
        } else {
            None
        };
        RateLimiterSnapshot {
            limit: self.cfg.effective_limit(),
            window_ms: self.cfg.effective_window_ms() as u64,
            tokens: st.tokens,
            waiting: st.waiters.len(),
            estimated_wait_ms,
        }
    }
}

/// Serves queued waiters oldest-first as tokens accrue; exits once the queue is empty.
async fn drain(shared: Arc<Shared>) {
    loop {
        let wait = {
            let mut st = shared.lock();
            shared.refill_locked(&mut st);
            while st.tokens >= 1.0 && grant_next(&mut st.waiters) {
                st.tokens -= 1.0;
            }
            if st.waiters.is_empty() {
                st.draining = false;
                return;
            }
            shared.wait_for_next_token(&st)
        };
        tokio::time::sleep(wait).await;
    }
}
