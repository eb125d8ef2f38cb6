use crate::constants::needs_device_reset;
use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the coordination service.
///
/// `Busy` and `Rejected` are returned synchronously to control callers.
/// `Timeout`, `Cancelled`, `Device`, and `ProtocolMismatch` are reported
/// through the listener when a capture loop unwinds.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A conflicting pause or transition already holds the coordinator.
    #[error("coordinator busy: {reason}")]
    Busy { reason: String },

    /// The operation is not valid in the coordinator's current state.
    #[error("operation rejected in state {state}: {reason}")]
    Rejected { state: String, reason: String },

    /// The operation-level deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled by a control request.
    #[error("operation cancelled")]
    Cancelled,

    /// The sensor or secure channel reported a failure code.
    #[error("device error {code}: {message}")]
    Device { code: i32, message: String },

    /// The secure channel returned a response of an unexpected shape.
    /// Fatal to the current operation, never to the process.
    #[error("unexpected secure channel response: {message}")]
    ProtocolMismatch { message: String },

    /// A state transition that the state machine does not permit.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl Error {
    /// Create a new busy error.
    pub fn busy(reason: impl Into<String>) -> Self {
        Self::Busy {
            reason: reason.into(),
        }
    }

    /// Create a new rejected error.
    pub fn rejected(state: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            state: state.into(),
            reason: reason.into(),
        }
    }

    /// Create a new device error.
    pub fn device(code: i32, message: impl Into<String>) -> Self {
        Self::Device {
            code,
            message: message.into(),
        }
    }

    /// Create a new protocol mismatch error.
    pub fn protocol_mismatch(message: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            message: message.into(),
        }
    }

    /// Whether this error carries a device status code in the
    /// reset-recovery range.
    #[must_use]
    pub fn is_reset_recoverable(&self) -> bool {
        matches!(self, Self::Device { code, .. } if needs_device_reset(*code))
    }
}
