//! FIFO grant hand-off shared by the rate limiter and the semaphore.
//!
//! A waiter parks on a oneshot receiver; the owner of the resource pops the oldest sender and
//! transfers one unit by sending `()`. If the waiting future is dropped after a unit was sent
//! but before it was observed, the unit is handed back through `refund`.

use tokio::sync::oneshot;

pub(crate) type GrantSender = oneshot::Sender<()>;

pub(crate) struct Grant<R: FnOnce()> {
    rx: oneshot::Receiver<()>,
    refund: Option<R>,
}

impl<R: FnOnce()> Grant<R> {
    pub(crate) fn new(rx: oneshot::Receiver<()>, refund: R) -> Self {
        Self {
            rx,
            refund: Some(refund),
        }
    }

    /// Resolves once a unit was handed over. `Err` means the sender was dropped without
    /// granting (the queue was cleared).
    pub(crate) async fn wait(mut self) -> Result<(), oneshot::error::RecvError> {
        let res = (&mut self.rx).await;
        self.refund = None;
        res
    }
}

impl<R: FnOnce()> Drop for Grant<R> {
    fn drop(&mut self) {
        if let Some(refund) = self.refund.take() {
            self.rx.close();
            if self.rx.try_recv().is_ok() {
                refund();
            }
        }
    }
}

/// Hand one unit to the oldest waiter that is still listening. Returns `false` when no live
/// waiter was found; stale senders encountered on the way are discarded.
pub(crate) fn grant_next(queue: &mut std::collections::VecDeque<GrantSender>) -> bool {
    while let Some(tx) = queue.pop_front() {
        if tx.send(()).is_ok() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_grant_resolves_after_send() {
        let (tx, rx) = oneshot::channel();
        let refunds = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&refunds);
        let grant = Grant::new(rx, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        tx.send(()).unwrap();
        assert!(grant.wait().await.is_ok());
        assert_eq!(refunds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_after_send_refunds() {
        let (tx, rx) = oneshot::channel();
        let refunds = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&refunds);
        let grant = Grant::new(rx, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        tx.send(()).unwrap();
        drop(grant);
        assert_eq!(refunds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_before_send_does_not_refund() {
        let (tx, rx) = oneshot::channel::<()>();
        let refunds = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&refunds);
        let grant = Grant::new(rx, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        drop(grant);
        assert!(tx.send(()).is_err());
        assert_eq!(refunds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_grant_next_skips_closed_waiters() {
        let mut queue = VecDeque::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        queue.push_back(tx1);
        queue.push_back(tx2);
        drop(rx1);

        assert!(grant_next(&mut queue));
        assert!(rx2.try_recv().is_ok());
        assert!(queue.is_empty());
        assert!(!grant_next(&mut queue));
    }
}
