//! The control signal: a level-triggered wakeup shared between control
//! callers and the worker.
//!
//! Control callers `raise` it after recording a transition request; the
//! worker (or the capture loop it runs) observes it either by a bounded
//! wait or a non-blocking peek, and the worker clears it when it consumes
//! the pending request. The flag is level-triggered so a raise is never
//! lost to a waiter that registered late, and the `Notify` underneath
//! removes the need to poll.
//!
//! Exactly one task waits on the signal at a time: the worker, or the
//! capture loop currently running on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Cancellation/wakeup token passed into every blocking helper used
/// inside a capture loop.
#[derive(Debug, Default)]
pub struct ControlSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl ControlSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assert the signal, waking the worker if it is waiting.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// De-assert the signal. Called by the worker when it consumes the
    /// pending transition.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Non-blocking peek.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Wait until the signal is raised.
    pub async fn wait(&self) {
        loop {
            if self.is_raised() {
                return;
            }
            // A raise between the check above and this await parks a
            // permit in the Notify, so the await completes immediately.
            self.notify.notified().await;
        }
    }

    /// Wait until the signal is raised, up to `timeout`. Returns whether
    /// the signal was raised within the window.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}
