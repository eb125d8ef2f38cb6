//! Error types for hardware operations.
//!
//! Failures of the sensor device or the secure-channel transport. Status
//! codes that the secure channel returns as *data* (capture
//! classifications, device-reset requests) are not errors at this layer;
//! they travel through the typed result types instead.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while driving the sensor or the secure channel.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Operation is not supported by this device.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Secure channel transport error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Response data of an unexpected shape or length.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Device initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }
}

/// Fold a transport failure into the service-level taxonomy: timeouts stay
/// timeouts, malformed responses are protocol mismatches, and everything
/// else is a device error with an I/O-style code.
impl From<HardwareError> for whorl_core::Error {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Timeout { .. } => whorl_core::Error::Timeout,
            HardwareError::InvalidData { message } => {
                whorl_core::Error::protocol_mismatch(message)
            }
            other => whorl_core::Error::device(-5, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_error() {
        let error = HardwareError::disconnected("fpc1035");
        assert!(matches!(error, HardwareError::Disconnected { .. }));
        assert_eq!(error.to_string(), "Device disconnected: fpc1035");
    }

    #[test]
    fn test_timeout_error() {
        let error = HardwareError::timeout(3000);
        assert!(matches!(error, HardwareError::Timeout { .. }));
        assert_eq!(error.to_string(), "Operation timeout after 3000ms");
    }

    #[test]
    fn test_conversion_to_core() {
        let timeout: whorl_core::Error = HardwareError::timeout(100).into();
        assert!(matches!(timeout, whorl_core::Error::Timeout));

        let mismatch: whorl_core::Error =
            HardwareError::invalid_data("short identify response").into();
        assert!(matches!(
            mismatch,
            whorl_core::Error::ProtocolMismatch { .. }
        ));

        let device: whorl_core::Error = HardwareError::disconnected("sensor").into();
        assert!(matches!(device, whorl_core::Error::Device { code: -5, .. }));
    }
}
