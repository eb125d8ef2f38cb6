//! Hardware abstraction layer for the Whorl sensor coordination service.
//!
//! This crate defines the two collaborators the operation coordinator
//! drives (the physical sensor and the secure channel to the matching
//! co-processor) as traits, together with the typed result vocabulary
//! the capture loops consume and mock implementations for development and
//! testing without hardware.
//!
//! # Design
//!
//! - **Async-first**: all I/O operations are `async fn` in traits
//!   (Edition 2024 RPITIT); use generic type parameters rather than trait
//!   objects.
//! - **Status codes are data**: the secure channel reports capture
//!   classifications and recovery hints as codes, so the typed layer
//!   returns them as values ([`CaptureOutcome`], [`EnrollUpdate`],
//!   [`IdentifyDecision`]) and reserves `Err` for transport failures.
//! - **Two layers**: [`SecureChannel`] is the raw request/response
//!   transport keyed by opaque [`Command`] identifiers;
//!   [`Matcher`] is the typed surface the coordinator consumes, and
//!   [`SecureMatcher`] adapts one onto the other.
//!
//! # Mocks
//!
//! [`mock::MockSensor`] and [`mock::MockMatcher`] are created as
//! `(device, handle)` pairs; the handle scripts outcomes and records the
//! operations the coordinator issued:
//!
//! ```
//! use whorl_hardware::mock::MockMatcher;
//! use whorl_hardware::traits::Matcher;
//! use whorl_hardware::types::CaptureOutcome;
//!
//! #[tokio::main]
//! async fn main() -> whorl_hardware::Result<()> {
//!     let (mut matcher, handle) = MockMatcher::new();
//!     handle.push_image(CaptureOutcome::Good);
//!
//!     assert_eq!(matcher.acquire_image().await?, CaptureOutcome::Good);
//!     Ok(())
//! }
//! ```
//!
//! [`CaptureOutcome`]: types::CaptureOutcome
//! [`EnrollUpdate`]: types::EnrollUpdate
//! [`IdentifyDecision`]: types::IdentifyDecision
//! [`SecureChannel`]: traits::SecureChannel
//! [`Command`]: traits::Command
//! [`Matcher`]: traits::Matcher
//! [`SecureMatcher`]: matcher::SecureMatcher

pub mod commands;
pub mod error;
pub mod matcher;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{HardwareError, Result};
pub use matcher::SecureMatcher;
pub use traits::{Command, GestureSink, Matcher, NullGestureSink, SecureChannel, SensorDevice};
pub use types::{
    CaptureOutcome, DeviceInfo, EnrollUpdate, Gesture, IdentifyDecision, SensorInterrupt, WorkMode,
};
