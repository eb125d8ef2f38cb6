//! Asynchronous operation coordination for a single fingerprint sensor.
//!
//! One dedicated worker owns exclusive access to the sensor and runs
//! long, retry-heavy, cancellable capture loops (enroll, authenticate,
//! passive gesture navigation), while a small state machine keeps a
//! control surface responsive for short administrative calls. Control
//! requests always beat racing hardware interrupts, cancellation is
//! cooperative through an explicit [`ControlSignal`] token, and every
//! capture loop exit reports exactly once through the [`Notifier`].
//!
//! # Architecture
//!
//! ```text
//!  callers ──► FingerprintService ──► OperationCoordinator ──► worker
//!                 (pause window:          state machine +        │
//!                  enumerate, remove,     control signal     EventMultiplexer
//!                  group switch)                             (control ⊕ sensor irq)
//!                                                                │
//!                                                          capture loops
//!                                                     (SensorRig: sensor+matcher)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use whorl_coordinator::{CoordinatorConfig, FingerprintService};
//! use whorl_hardware::mock::{MockMatcher, MockSensor};
//! use whorl_hardware::NullGestureSink;
//!
//! #[tokio::main]
//! async fn main() -> whorl_core::Result<()> {
//!     let (sensor, _sensor_handle) = MockSensor::new();
//!     let (matcher, _matcher_handle) = MockMatcher::new();
//!     let service = FingerprintService::start(
//!         sensor,
//!         matcher,
//!         Arc::new(NullGestureSink),
//!         CoordinatorConfig::default(),
//!     );
//!
//!     let challenge = service.pre_enroll().await?;
//!     println!("challenge: {challenge}");
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

mod capture;
pub mod config;
pub mod coordinator;
pub mod mux;
pub mod notifier;
pub mod service;
pub mod signal;
pub mod state;

pub use config::CoordinatorConfig;
pub use coordinator::{OperationCoordinator, SensorRig};
pub use mux::{EventMultiplexer, WakeupReason};
pub use notifier::{
    EventListener, Notifier, ProgressEvent, ProgressKind, ResultEvent, ResultKind,
};
pub use service::FingerprintService;
pub use signal::ControlSignal;
pub use state::{
    AuthenticateParams, EnrollParams, OperationRequest, OperationState, TransitionRequest,
};
