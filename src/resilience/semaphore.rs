use super::waiter::{grant_next, Grant, GrantSender};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct SemaphoreSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
    pub waiting: usize,
}

#[derive(Debug)]
struct State {
    permits: usize,
    waiting: VecDeque<GrantSender>,
}

/// Counting semaphore with strict FIFO hand-off.
///
/// A released permit goes straight to the oldest waiter that is still listening; only when
/// nobody waits does the free count grow, and never beyond `max_permits`.
#[derive(Debug)]
pub struct Semaphore {
    max_permits: usize,
    state: Mutex<State>,
}

impl Semaphore {
    /// `max_permits` below 1 is raised to 1.
    pub fn new(max_permits: usize) -> Self {
        let max_permits = max_permits.max(1);
        Self {
            max_permits,
            state: Mutex::new(State {
                permits: max_permits,
                waiting: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Wait for a permit. The returned guard gives it back on drop.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        loop {
            let rx = {
                let mut st = self.lock();
                if st.waiting.is_empty() && st.permits > 0 {
                    st.permits -= 1;
                    return SemaphorePermit { sem: self };
                }
                let (tx, rx) = tokio::sync::oneshot::channel();
                st.waiting.push_back(tx);
                rx
            };

            // Senders are only dropped unsent when the receiver is already gone, so an
            // error here cannot be observed by a live waiter; queue again to stay safe.
            if Grant::new(rx, || self.release()).wait().await.is_ok() {
                return SemaphorePermit { sem: self };
            }
        }
    }

    /// Take a permit only if one is free and nobody is queued ahead.
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        let mut st = self.lock();
        if st.waiting.is_empty() && st.permits > 0 {
            st.permits -= 1;
            Some(SemaphorePermit { sem: self })
        } else {
            None
        }
    }

    /// Return a permit to the pool, waking the oldest waiter first.
    ///
    /// Normally called through [`SemaphorePermit`]'s drop; call it directly only for permits
    /// detached with [`SemaphorePermit::forget`].
    pub fn release(&self) {
        let mut st = self.lock();
        if !grant_next(&mut st.waiting) {
            st.permits = (st.permits + 1).min(self.max_permits);
        }
    }

    pub fn available(&self) -> usize {
        self.lock().permits
    }

    pub fn waiting(&self) -> usize {
        self.lock().waiting.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Run `fut` while holding a permit. The permit is released however `fut` ends,
    /// including a panic or the returned future being dropped.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        fut.await
    }

    pub fn snapshot(&self) -> SemaphoreSnapshot {
        let st = self.lock();
        SemaphoreSnapshot {
            max: self.max_permits,
            available: st.permits,
            in_use: self.max_permits - st.permits,
            waiting: st.waiting.iter().filter(|tx| !tx.is_closed()).count(),
        }
    }
}

/// A held permit; dropping it releases back to the [`Semaphore`].
#[must_use = "dropping the permit releases it immediately"]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl SemaphorePermit<'_> {
    /// Keep the permit checked out without a guard; pair with [`Semaphore::release`].
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}
