//! Core constants for the sensor coordination service.
//!
//! These values govern the retry, pacing, and timeout behavior of the
//! capture loops and the coordinator worker. They are centralized here so
//! the coordinator, the capture loops, and the tests agree on the same
//! bounds.
//!
//! # Retry policy
//!
//! A degraded capture (`Partial` or `ImagerDirty`) is retried locally with
//! a sensor soft-reset in between. [`MAX_REIMAGE_ATTEMPTS`] bounds that
//! local retry: when the bound is reached the degraded condition is
//! reported to the listener once and the counter restarts. A `Good`
//! capture also restarts the counter.
//!
//! Status codes in [`DEVICE_RESET_STATUS_RANGE`] indicate the sensor needs
//! a full device reset before the next iteration. That recovery path is
//! independent of the re-image counter.
//!
//! # Pacing
//!
//! The worker waits [`IDLE_DISPATCH_WAIT`] for a transition request before
//! dispatching the idle handler, and the idle handler itself grants
//! another [`NAVIGATION_GRACE`] to the control signal before entering
//! navigation polling. Together these keep bursts of short control calls
//! from repeatedly paying the cost of entering and leaving a hardware
//! polling mode.

use std::ops::RangeInclusive;
use std::time::Duration;

/// Bound on consecutive degraded-image retries before the condition is
/// surfaced to the listener and the counter restarts.
pub const MAX_REIMAGE_ATTEMPTS: u32 = 7;

/// How long the worker waits for a transition request before running the
/// idle handler.
pub const IDLE_DISPATCH_WAIT: Duration = Duration::from_millis(500);

/// Grace period granted to the control signal before the idle handler
/// enters navigation polling.
pub const NAVIGATION_GRACE: Duration = Duration::from_millis(500);

/// Settle time after dropping the SPI link during a sensor soft reset.
pub const SENSOR_RESET_SETTLE: Duration = Duration::from_millis(150);

/// Settle time after re-raising the SPI link.
pub const SPI_SETTLE: Duration = Duration::from_millis(10);

/// Pause after reporting a degraded image, before the next detect cycle.
pub const DEGRADED_REPORT_BACKOFF: Duration = Duration::from_millis(10);

/// Hint passed to the finger-lost poll, in milliseconds.
pub const FINGER_LOST_POLL_MS: u32 = 30;

/// How long a control caller waits for the worker to acknowledge a
/// transition before reporting a retryable failure.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default enrollment deadline when the caller does not supply one.
pub const DEFAULT_ENROLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of templates one group may hold.
pub const MAX_ENROLLED_PRINTS: usize = 5;

/// Enrollment is complete when reported progress reaches this percentage.
pub const ENROLL_COMPLETE_PERCENT: u8 = 100;

/// Device status codes that require a full sensor reset before the next
/// capture iteration.
pub const DEVICE_RESET_STATUS_RANGE: RangeInclusive<i32> = 90..=99;

/// Check whether a device status code falls in the reset-recovery range.
#[must_use]
pub fn needs_device_reset(code: i32) -> bool {
    DEVICE_RESET_STATUS_RANGE.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_range_bounds() {
        assert!(needs_device_reset(90));
        assert!(needs_device_reset(99));
        assert!(!needs_device_reset(89));
        assert!(!needs_device_reset(100));
        assert!(!needs_device_reset(0));
        assert!(!needs_device_reset(-5));
    }

    #[test]
    fn test_pacing_relationship() {
        // The ack timeout must exceed the idle dispatch wait, otherwise a
        // request issued right after the worker went to sleep could never
        // be acknowledged in time.
        assert!(DEFAULT_ACK_TIMEOUT > IDLE_DISPATCH_WAIT);
    }
}
