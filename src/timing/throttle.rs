use super::Timer;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

type Callback<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

struct State<A, R> {
    last_invoke: Option<Instant>,
    pending_args: Option<A>,
    timer: Option<Timer>,
    timer_seq: u64,
    last_result: Option<R>,
}

struct Inner<A, R> {
    func: Callback<A, R>,
    limit: Duration,
    state: Mutex<State<A, R>>,
}

/// Runs the wrapped function at most once per `limit` window.
///
/// The first call of a window runs immediately. Later calls in the same window are folded
/// into one call at the end of the window, made with the most recent arguments.
pub struct Throttler<A, R> {
    inner: Arc<Inner<A, R>>,
}

impl<A, R> Clone for Throttler<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> Throttler<A, R>
where
    A: Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new<F>(func: F, limit: Duration) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                func: Arc::new(func),
                limit,
                state: Mutex::new(State {
                    last_invoke: None,
                    pending_args: None,
                    timer: None,
                    timer_seq: 0,
                    last_result: None,
                }),
            }),
        }
    }

    pub fn limit(&self) -> Duration {
        self.inner.limit
    }

    /// Returns the result of the invocation this call triggered, or the cached result of the
    /// latest earlier invocation.
    pub fn call(&self, args: A) -> Option<R> {
        let inner = &self.inner;
        let now = Instant::now();
        let mut st = inner.lock();

        let window_open = st
            .last_invoke
            .map_or(true, |t| now.saturating_duration_since(t) >= inner.limit);
        if window_open && st.timer.is_none() {
            st.last_invoke = Some(now);
            drop(st);
            return Some(inner.invoke(args));
        }

        st.pending_args = Some(args);
        if st.timer.is_none() {
            let deadline = st.last_invoke.map_or(now, |t| t + inner.limit);
            st.timer_seq += 1;
            let id = st.timer_seq;
            let task_inner = Arc::clone(inner);
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                fire(&task_inner, id);
            });
            st.timer = Some(Timer { id, handle });
        }
        st.last_result.clone()
    }

    /// Drop the deferred call, if any.
    pub fn cancel(&self) {
        let mut st = self.inner.lock();
        if let Some(timer) = st.timer.take() {
            timer.cancel();
        }
        st.pending_args = None;
    }

    pub fn pending(&self) -> bool {
        self.inner.lock().timer.is_some()
    }
}

impl<A, R: Clone> Inner<A, R> {
    fn lock(&self) -> MutexGuard<'_, State<A, R>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn invoke(&self, args: A) -> R {
        let result = (self.func)(args);
        self.lock().last_result = Some(result.clone());
        result
    }
}

fn fire<A, R: Clone>(inner: &Inner<A, R>, id: u64) {
    let mut st = inner.lock();
    if st.timer.as_ref().map(|t| t.id) != Some(id) {
        return;
    }
    st.timer = None;
    let Some(args) = st.pending_args.take() else {
        return;
    };
    st.last_invoke = Some(Instant::now());
    drop(st);
    inner.invoke(args);
}
