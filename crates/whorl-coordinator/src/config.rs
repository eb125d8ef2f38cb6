//! Coordinator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use whorl_core::constants;

/// Tunable pacing and retry parameters for the coordinator and its
/// capture loops. The defaults come from
/// [`whorl_core::constants`] and match the behavior described there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long the worker waits for a transition request before running
    /// the idle handler.
    pub idle_dispatch_wait: Duration,

    /// Grace period granted to the control signal before the idle handler
    /// enters navigation polling.
    pub navigation_grace: Duration,

    /// How long a control caller waits for the worker to acknowledge a
    /// transition.
    pub ack_timeout: Duration,

    /// Bound on consecutive degraded-image retries.
    pub max_reimage_attempts: u32,

    /// Settle time between the SPI drop and re-raise of a sensor soft
    /// reset.
    pub reimage_backoff: Duration,

    /// Pause after a degraded image has been reported.
    pub degraded_report_backoff: Duration,

    /// Enrollment deadline applied when the caller does not supply one.
    pub default_enroll_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            idle_dispatch_wait: constants::IDLE_DISPATCH_WAIT,
            navigation_grace: constants::NAVIGATION_GRACE,
            ack_timeout: constants::DEFAULT_ACK_TIMEOUT,
            max_reimage_attempts: constants::MAX_REIMAGE_ATTEMPTS,
            reimage_backoff: constants::SENSOR_RESET_SETTLE,
            degraded_report_backoff: constants::DEGRADED_REPORT_BACKOFF,
            default_enroll_timeout: constants::DEFAULT_ENROLL_TIMEOUT,
        }
    }
}
