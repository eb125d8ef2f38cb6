//! Shared fixtures for the coordinator integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use whorl_coordinator::{EventListener, ProgressEvent, ProgressKind, ResultEvent, ResultKind};
use whorl_core::{Error, FingerId};
use whorl_hardware::{CaptureOutcome, Gesture, GestureSink};

/// Everything the coordinator told the listener, in arrival order.
#[derive(Debug, Clone)]
pub enum Recorded {
    Progress(ProgressKind),
    Result(ResultKind),
    Error(Error),
    Removed(FingerId, u32),
    Enumerated(FingerId, u32),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    fn push(&self, event: Recorded) {
        self.events.lock().expect("listener poisoned").push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().expect("listener poisoned").clone()
    }

    /// Remaining-percentage values from enroll progress reports.
    pub fn enroll_remaining(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Progress(ProgressKind::EnrollStep { remaining, .. }) => Some(remaining),
                _ => None,
            })
            .collect()
    }

    /// Acquisition feedback reports.
    pub fn acquired(&self) -> Vec<CaptureOutcome> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Progress(ProgressKind::Acquired(outcome)) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<ResultKind> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Result(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<Error> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn removed(&self) -> Vec<(FingerId, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Removed(finger, remaining) => Some((finger, remaining)),
                _ => None,
            })
            .collect()
    }

    pub fn enumerated(&self) -> Vec<(FingerId, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Enumerated(finger, remaining) => Some((finger, remaining)),
                _ => None,
            })
            .collect()
    }
}

impl EventListener for RecordingListener {
    fn on_progress(&self, event: ProgressEvent) {
        self.push(Recorded::Progress(event.kind));
    }
    fn on_result(&self, event: ResultEvent) {
        self.push(Recorded::Result(event.kind));
    }
    fn on_error(&self, error: Error) {
        self.push(Recorded::Error(error));
    }
    fn on_removed(&self, finger: FingerId, remaining: u32) {
        self.push(Recorded::Removed(finger, remaining));
    }
    fn on_enumerated(&self, finger: FingerId, remaining: u32) {
        self.push(Recorded::Enumerated(finger, remaining));
    }
}

/// Gesture sink that remembers what it was handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingGestureSink {
    gestures: Arc<Mutex<Vec<Gesture>>>,
}

impl RecordingGestureSink {
    pub fn gestures(&self) -> Vec<Gesture> {
        self.gestures.lock().expect("sink poisoned").clone()
    }
}

impl GestureSink for RecordingGestureSink {
    fn emit(&self, gesture: Gesture) {
        self.gestures.lock().expect("sink poisoned").push(gesture);
    }
}

/// Poll `condition` until it holds, or fail the test after ten seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {what}");
}
