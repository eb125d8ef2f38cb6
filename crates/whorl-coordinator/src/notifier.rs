//! Listener notification sink.
//!
//! Forwards progress, result, and error events from the capture loops and
//! administrative calls to the one registered listener. Registration is
//! last-setter-wins and guarded by its own lock, separate from the state
//! lock, so a slow listener callback never blocks state transitions. The
//! listener reference is cloned out of the lock before the callback runs:
//! replacing the listener mid-report can never deadlock or crash the
//! in-flight delivery, and the callback is never entered while the lock
//! is held.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;
use whorl_core::{AuthToken, Error, FingerId};
use whorl_hardware::CaptureOutcome;

/// Incremental feedback during an operation.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Identity of the coordinator that produced the event.
    pub device_id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: ProgressKind,
}

/// What a progress event reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Feedback about one acquisition attempt (good, too fast, degraded).
    Acquired(CaptureOutcome),
    /// An enroll step completed; `remaining` is the percentage still to
    /// capture.
    EnrollStep { finger: FingerId, remaining: u8 },
}

/// Terminal outcome of an operation.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEvent {
    pub device_id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: ResultKind,
}

/// What a result event reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Enrollment finished; `remaining` is always zero.
    Enrolled { finger: FingerId, remaining: u8 },
    /// Authentication concluded. A `finger` of [`FingerId::NONE`] means
    /// the image was conclusive but matched nothing.
    Authenticated { finger: FingerId, token: AuthToken },
}

/// Receiver of coordinator events.
///
/// Callbacks are fire-and-forget and must not block for long; they are
/// invoked from the worker task (operation events) or from the calling
/// task (administrative events), one at a time per coordinator.
pub trait EventListener: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
    fn on_result(&self, event: ResultEvent);
    fn on_error(&self, error: Error);
    fn on_removed(&self, finger: FingerId, remaining: u32);
    fn on_enumerated(&self, finger: FingerId, remaining: u32);
}

/// Serialized access to the registered listener.
pub struct Notifier {
    device_id: Uuid,
    listener: Mutex<Option<Arc<dyn EventListener>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            device_id: Uuid::new_v4(),
            listener: Mutex::new(None),
        }
    }

    /// Identity carried in every event from this coordinator.
    #[must_use]
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    /// Register the listener. Replaces any previous registration.
    pub fn set_listener(&self, listener: Arc<dyn EventListener>) {
        *self.listener.lock().expect("listener lock poisoned") = Some(listener);
    }

    /// Remove the listener; later events are dropped with a warning.
    pub fn clear_listener(&self) {
        *self.listener.lock().expect("listener lock poisoned") = None;
    }

    fn current(&self) -> Option<Arc<dyn EventListener>> {
        let listener = self.listener.lock().expect("listener lock poisoned");
        if listener.is_none() {
            warn!("listener not set, dropping event");
        }
        listener.clone()
    }

    pub fn acquired(&self, outcome: CaptureOutcome) {
        if let Some(listener) = self.current() {
            listener.on_progress(ProgressEvent {
                device_id: self.device_id,
                at: Utc::now(),
                kind: ProgressKind::Acquired(outcome),
            });
        }
    }

    pub fn enroll_progress(&self, finger: FingerId, remaining: u8) {
        if let Some(listener) = self.current() {
            listener.on_progress(ProgressEvent {
                device_id: self.device_id,
                at: Utc::now(),
                kind: ProgressKind::EnrollStep { finger, remaining },
            });
        }
    }

    pub fn enrolled(&self, finger: FingerId) {
        if let Some(listener) = self.current() {
            listener.on_result(ResultEvent {
                device_id: self.device_id,
                at: Utc::now(),
                kind: ResultKind::Enrolled {
                    finger,
                    remaining: 0,
                },
            });
        }
    }

    pub fn authenticated(&self, finger: FingerId, token: AuthToken) {
        if let Some(listener) = self.current() {
            listener.on_result(ResultEvent {
                device_id: self.device_id,
                at: Utc::now(),
                kind: ResultKind::Authenticated { finger, token },
            });
        }
    }

    pub fn error(&self, error: Error) {
        if let Some(listener) = self.current() {
            listener.on_error(error);
        }
    }

    pub fn removed(&self, finger: FingerId, remaining: u32) {
        if let Some(listener) = self.current() {
            listener.on_removed(finger, remaining);
        }
    }

    pub fn enumerated(&self, finger: FingerId, remaining: u32) {
        if let Some(listener) = self.current() {
            listener.on_enumerated(finger, remaining);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        progress: AtomicUsize,
        results: AtomicUsize,
        errors: AtomicUsize,
    }

    impl EventListener for CountingListener {
        fn on_progress(&self, _event: ProgressEvent) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
        fn on_result(&self, _event: ResultEvent) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }
        fn on_error(&self, _error: Error) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_removed(&self, _finger: FingerId, _remaining: u32) {}
        fn on_enumerated(&self, _finger: FingerId, _remaining: u32) {}
    }

    #[test]
    fn test_events_without_listener_are_dropped() {
        let notifier = Notifier::new();
        // Must not panic.
        notifier.acquired(CaptureOutcome::Good);
        notifier.error(Error::Cancelled);
    }

    #[test]
    fn test_events_reach_listener() {
        let notifier = Notifier::new();
        let listener = Arc::new(CountingListener::default());
        notifier.set_listener(listener.clone());

        notifier.acquired(CaptureOutcome::Good);
        notifier.enroll_progress(FingerId::new(1), 80);
        notifier.enrolled(FingerId::new(1));
        notifier.error(Error::Timeout);

        assert_eq!(listener.progress.load(Ordering::SeqCst), 2);
        assert_eq!(listener.results.load(Ordering::SeqCst), 1);
        assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_setter_wins() {
        let notifier = Notifier::new();
        let first = Arc::new(CountingListener::default());
        let second = Arc::new(CountingListener::default());

        notifier.set_listener(first.clone());
        notifier.set_listener(second.clone());
        notifier.acquired(CaptureOutcome::Good);

        assert_eq!(first.progress.load(Ordering::SeqCst), 0);
        assert_eq!(second.progress.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replacing_listener_from_callback_does_not_deadlock() {
        // The notifier must not hold its lock while the callback runs.
        struct Replacing {
            notifier: Arc<Notifier>,
        }
        impl EventListener for Replacing {
            fn on_progress(&self, _event: ProgressEvent) {
                self.notifier.clear_listener();
            }
            fn on_result(&self, _event: ResultEvent) {}
            fn on_error(&self, _error: Error) {}
            fn on_removed(&self, _finger: FingerId, _remaining: u32) {}
            fn on_enumerated(&self, _finger: FingerId, _remaining: u32) {}
        }

        let notifier = Arc::new(Notifier::new());
        notifier.set_listener(Arc::new(Replacing {
            notifier: notifier.clone(),
        }));
        notifier.acquired(CaptureOutcome::Good);
        // Listener removed itself; the next event is dropped.
        notifier.acquired(CaptureOutcome::Good);
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent {
            device_id: Uuid::nil(),
            at: Utc::now(),
            kind: ProgressKind::EnrollStep {
                finger: FingerId::new(2),
                remaining: 60,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("enroll_step"));
        assert!(json.contains("60"));
    }
}
