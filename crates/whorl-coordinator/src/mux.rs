//! The event multiplexer: one blocking wait over the two sources a
//! capture loop cares about.
//!
//! Control requests have priority over finger events: a cancel issued
//! exactly as a finger touches the sensor must never be dropped, so a
//! simultaneously-ready pair always reports [`WakeupReason::ControlSignal`].
//! A closed hardware source degrades to [`WakeupReason::Timeout`] so the
//! caller's own cancel-check loop keeps making progress instead of
//! hanging.

use crate::signal::ControlSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use whorl_hardware::SensorInterrupt;

/// Which source ended a multiplexer wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupReason {
    /// Neither source fired before the deadline.
    Timeout,
    /// The control signal is raised (typically a cancellation).
    ControlSignal,
    /// The sensor raised a finger interrupt.
    HardwareEvent,
}

/// Blocking wait primitive over the control signal and the sensor
/// interrupt line. Owned by the worker; both sources are registered once
/// at construction.
#[derive(Debug)]
pub struct EventMultiplexer {
    control: Arc<ControlSignal>,
    hardware: mpsc::Receiver<SensorInterrupt>,
}

impl EventMultiplexer {
    pub fn new(control: Arc<ControlSignal>, hardware: mpsc::Receiver<SensorInterrupt>) -> Self {
        Self { control, hardware }
    }

    /// Block until a source is ready or `timeout` elapses
    /// (`None` blocks indefinitely).
    pub async fn wait(&mut self, timeout: Option<Duration>) -> WakeupReason {
        // Control requests preempt a racing hardware event.
        if self.control.is_raised() {
            return WakeupReason::ControlSignal;
        }

        let deadline = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.control.wait() => WakeupReason::ControlSignal,
            event = self.hardware.recv() => match event {
                // The control signal may have been raised while the
                // select was already committing to the hardware branch.
                Some(_) if self.control.is_raised() => WakeupReason::ControlSignal,
                Some(_) => WakeupReason::HardwareEvent,
                None => {
                    warn!("hardware interrupt source closed, treating wait as timeout");
                    WakeupReason::Timeout
                }
            },
            _ = deadline => WakeupReason::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mux_pair() -> (
        Arc<ControlSignal>,
        mpsc::Sender<SensorInterrupt>,
        EventMultiplexer,
    ) {
        let control = Arc::new(ControlSignal::new());
        let (tx, rx) = mpsc::channel(32);
        let mux = EventMultiplexer::new(control.clone(), rx);
        (control, tx, mux)
    }

    #[tokio::test]
    async fn test_hardware_event() {
        let (_control, tx, mut mux) = mux_pair();
        tx.send(SensorInterrupt::now()).await.unwrap();
        assert_eq!(mux.wait(None).await, WakeupReason::HardwareEvent);
    }

    #[tokio::test]
    async fn test_control_signal() {
        let (control, _tx, mut mux) = mux_pair();
        control.raise();
        assert_eq!(mux.wait(None).await, WakeupReason::ControlSignal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (_control, _tx, mut mux) = mux_pair();
        assert_eq!(
            mux.wait(Some(Duration::from_millis(200))).await,
            WakeupReason::Timeout
        );
    }

    #[tokio::test]
    async fn test_control_beats_simultaneous_hardware_event() {
        // Both sources ready before the wait: control must win, every
        // time.
        for _ in 0..100 {
            let (control, tx, mut mux) = mux_pair();
            tx.send(SensorInterrupt::now()).await.unwrap();
            control.raise();
            assert_eq!(mux.wait(None).await, WakeupReason::ControlSignal);
        }
    }

    #[tokio::test]
    async fn test_closed_hardware_source_fails_open() {
        let (_control, tx, mut mux) = mux_pair();
        drop(tx);
        assert_eq!(
            mux.wait(Some(Duration::from_secs(5))).await,
            WakeupReason::Timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_control_wakes_blocked_wait() {
        let (control, _tx, mut mux) = mux_pair();
        let waiter = tokio::spawn(async move { mux.wait(None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.raise();
        assert_eq!(waiter.await.unwrap(), WakeupReason::ControlSignal);
    }
}
