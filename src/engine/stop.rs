//! Cooperative stop signal shared between a worker and its daemon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Clonable stop flag with a waker, so long waits (backoff sleep, IDLE,
/// pool replies) can be interrupted instead of polled. Triggering is
/// idempotent; the flag never resets.
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Safe to call any number of times from any task.
    pub fn trigger(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once the stop has been triggered. Resolves immediately when
    /// the trigger already happened.
    pub async fn cancelled(&self) {
        // check-after-register ordering: notified() is armed before the
        // second flag read, so a trigger between the two is not lost
        loop {
            if self.is_stopped() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}
