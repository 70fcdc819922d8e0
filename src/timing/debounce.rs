use super::Timer;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Quiet period after the last call before the trailing invocation.
    pub delay: Duration,
    /// Invoke on the first call of a burst.
    pub leading: bool,
    /// Invoke once more after the burst, with the last arguments.
    pub trailing: bool,
    /// Upper bound on how long a continuous burst can defer an invocation.
    pub max_wait: Option<Duration>,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            leading: false,
            trailing: true,
            max_wait: None,
        }
    }
}

impl DebounceConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
    pub fn with_leading(mut self, leading: bool) -> Self {
        self.leading = leading;
        self
    }
    pub fn with_trailing(mut self, trailing: bool) -> Self {
        self.trailing = trailing;
        self
    }
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

type Callback<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

struct State<A, R> {
    last_call: Option<Instant>,
    last_invoke: Option<Instant>,
    timer: Option<Timer>,
    timer_seq: u64,
    pending_args: Option<A>,
    last_result: Option<R>,
}

struct Inner<A, R> {
    func: Callback<A, R>,
    cfg: DebounceConfig,
    state: Mutex<State<A, R>>,
}

/// Coalesces bursts of calls into fewer invocations of the wrapped function.
///
/// Clones share the same timers and cached result.
pub struct Debouncer<A, R> {
    inner: Arc<Inner<A, R>>,
}

impl<A, R> Clone for Debouncer<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> Debouncer<A, R>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
{
    /// `max_wait` shorter than `delay` is raised to `delay`.
    pub fn new<F>(func: F, mut cfg: DebounceConfig) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        cfg.max_wait = cfg.max_wait.map(|m| m.max(cfg.delay));
        Self {
            inner: Arc::new(Inner {
                func: Arc::new(func),
                cfg,
                state: Mutex::new(State {
                    last_call: None,
                    last_invoke: None,
                    timer: None,
                    timer_seq: 0,
                    pending_args: None,
                    last_result: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.inner.cfg
    }

    /// Record a call. Returns the result of the invocation this call triggered, or the
    /// cached result of the latest earlier invocation.
    pub fn call(&self, args: A) -> Option<R> {
        let inner = &self.inner;
        let now = Instant::now();
        let mut st = inner.lock();
        let due = inner.should_invoke(&st, now);
        st.pending_args = Some(args);
        st.last_call = Some(now);

        let mut run_now = None;
        if due {
            if st.timer.is_none() {
                // leading edge of a new burst
                st.last_invoke = Some(now);
                schedule(inner, &mut st, now, inner.cfg.delay);
                if inner.cfg.leading {
                    run_now = st.pending_args.take();
                }
            } else if inner.cfg.max_wait.is_some() {
                schedule(inner, &mut st, now, inner.cfg.delay);
                st.last_invoke = Some(now);
                run_now = st.pending_args.take();
            }
        } else if st.timer.is_none() {
            schedule(inner, &mut st, now, inner.cfg.delay);
        }

        let cached = st.last_result.clone();
        drop(st);
        match run_now {
            Some(args) => Some(inner.invoke(args)),
            None => cached,
        }
    }

    /// Drop any pending trailing invocation without running it.
    pub fn cancel(&self) {
        let mut st = self.inner.lock();
        if let Some(timer) = st.timer.take() {
            timer.cancel();
        }
        st.pending_args = None;
        st.last_call = None;
        st.last_invoke = None;
    }

    /// Run the pending trailing invocation now, if there is one.
    pub fn flush(&self) -> Option<R> {
        let inner = &self.inner;
        let mut st = inner.lock();
        let Some(timer) = st.timer.take() else {
            return st.last_result.clone();
        };
        timer.cancel();
        let args = inner.trailing_edge(&mut st, Instant::now());
        let cached = st.last_result.clone();
        drop(st);
        match args {
            Some(args) => Some(inner.invoke(args)),
            None => cached,
        }
    }

    pub fn pending(&self) -> bool {
        self.inner.lock().timer.is_some()
    }
}

impl<A, R: Clone> Inner<A, R> {
    fn lock(&self) -> MutexGuard<'_, State<A, R>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn should_invoke(&self, st: &State<A, R>, now: Instant) -> bool {
        let Some(last_call) = st.last_call else {
            return true;
        };
        if now.saturating_duration_since(last_call) >= self.cfg.delay {
            return true;
        }
        match (self.cfg.max_wait, st.last_invoke) {
            (Some(max_wait), Some(last_invoke)) => {
                now.saturating_duration_since(last_invoke) >= max_wait
            }
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn remaining_wait(&self, st: &State<A, R>, now: Instant) -> Duration {
        let since_call = st
            .last_call
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        let wait = self.cfg.delay.saturating_sub(since_call);
        match (self.cfg.max_wait, st.last_invoke) {
            (Some(max_wait), Some(last_invoke)) => {
                wait.min(max_wait.saturating_sub(now.saturating_duration_since(last_invoke)))
            }
            _ => wait,
        }
    }

    /// Timer is already cleared by the caller. Returns the arguments to invoke with.
    fn trailing_edge(&self, st: &mut State<A, R>, now: Instant) -> Option<A> {
        let args = st.pending_args.take();
        if self.cfg.trailing && args.is_some() {
            st.last_invoke = Some(now);
            args
        } else {
            None
        }
    }

    fn invoke(&self, args: A) -> R {
        let result = (self.func)(args);
        self.lock().last_result = Some(result.clone());
        result
    }
}

fn schedule<A, R>(inner: &Arc<Inner<A, R>>, st: &mut State<A, R>, now: Instant, wait: Duration)
where
    A: Send + 'static,
    R: Clone + Send + 'static,
{
    if let Some(old) = st.timer.take() {
        old.cancel();
    }
    st.timer_seq += 1;
    let id = st.timer_seq;
    let deadline = now + wait;
    let inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        timer_expired(&inner, id);
    });
    st.timer = Some(Timer { id, handle });
}

fn timer_expired<A, R>(inner: &Arc<Inner<A, R>>, id: u64)
where
    A: Send + 'static,
    R: Clone + Send + 'static,
{
    let now = Instant::now();
    let mut st = inner.lock();
    if st.timer.as_ref().map(|t| t.id) != Some(id) {
        return;
    }
    st.timer = None;

    if inner.should_invoke(&st, now) {
        let args = inner.trailing_edge(&mut st, now);
        drop(st);
        if let Some(args) = args {
            inner.invoke(args);
        }
    } else {
        let wait = inner.remaining_wait(&st, now);
        schedule(inner, &mut st, now, wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{advance, sleep};

    fn recording(cfg: DebounceConfig) -> (Debouncer<u32, u32>, Arc<StdMutex<Vec<(u32, Instant)>>>) {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let c = Arc::clone(&calls);
        let debouncer = Debouncer::new(
            move |x: u32| {
                c.lock().unwrap().push((x, Instant::now()));
                x * 10
            },
            cfg,
        );
        (debouncer, calls)
    }

    fn args(calls: &StdMutex<Vec<(u32, Instant)>>) -> Vec<u32> {
        calls.lock().unwrap().iter().map(|(x, _)| *x).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_trailing_call() {
        let (d, calls) = recording(DebounceConfig::new(Duration::from_millis(100)));
        let start = Instant::now();
        for i in 1..=5 {
            assert_eq!(d.call(i), None);
            sleep(Duration::from_millis(50)).await;
        }
        assert!(d.pending());
        sleep(Duration::from_millis(200)).await;

        let recorded = calls.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, 5);
        // last call at 200ms, trailing edge 100ms later
        assert_eq!(recorded[0].1 - start, Duration::from_millis(300));
        assert!(!d.pending());
        assert_eq!(d.call(6), Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_edge_runs_immediately_once() {
        let (d, calls) =
            recording(DebounceConfig::new(Duration::from_millis(100)).with_leading(true));
        assert_eq!(d.call(1), Some(10));
        assert_eq!(d.call(2), Some(10));
        sleep(Duration::from_millis(150)).await;
        assert_eq!(args(&calls), vec![1, 2]);

        // a single call with both edges enabled runs once
        sleep(Duration::from_millis(500)).await;
        d.call(3);
        sleep(Duration::from_millis(500)).await;
        assert_eq!(args(&calls), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_only() {
        let (d, calls) = recording(
            DebounceConfig::new(Duration::from_millis(100))
                .with_leading(true)
                .with_trailing(false),
        );
        d.call(1);
        d.call(2);
        d.call(3);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(args(&calls), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_forces_invocation_during_burst() {
        let (d, calls) = recording(
            DebounceConfig::new(Duration::from_millis(100)).with_max_wait(Duration::from_millis(250)),
        );
        let start = Instant::now();
        for i in 0..20 {
            d.call(i);
            sleep(Duration::from_millis(50)).await;
        }
        let recorded = calls.lock().unwrap().clone();
        assert!(recorded.len() >= 3, "{:?}", recorded);
        let mut prev = start;
        for (_, at) in &recorded {
            assert!(*at - prev <= Duration::from_millis(250));
            prev = *at;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_is_raised_to_delay() {
        let (d, _) = recording(
            DebounceConfig::new(Duration::from_millis(100)).with_max_wait(Duration::from_millis(10)),
        );
        assert_eq!(d.config().max_wait, Some(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_call() {
        let (d, calls) = recording(DebounceConfig::new(Duration::from_millis(100)));
        d.call(1);
        assert!(d.pending());
        d.cancel();
        assert!(!d.pending());
        advance(Duration::from_millis(500)).await;
        assert!(args(&calls).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_pending_call_now() {
        let (d, calls) = recording(DebounceConfig::new(Duration::from_millis(100)));
        assert_eq!(d.flush(), None);
        d.call(4);
        d.call(7);
        assert_eq!(d.flush(), Some(70));
        assert!(!d.pending());
        sleep(Duration::from_millis(500)).await;
        assert_eq!(args(&calls), vec![7]);
        assert_eq!(d.flush(), Some(70));
    }
}
