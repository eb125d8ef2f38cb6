//! Hardware trait definitions.
//!
//! These traits establish the contract between the operation coordinator
//! and the two physical collaborators it drives: the sensor device (power,
//! reset, and the interrupt line) and the secure channel to the matching
//! co-processor. Mock implementations live in the [`mock`](crate::mock)
//! module so the coordinator can be exercised without hardware.
//!
//! All traits use native `async fn` methods (Edition 2024 RPITIT); use
//! generic type parameters rather than trait objects.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::types::{
    CaptureOutcome, DeviceInfo, EnrollUpdate, Gesture, IdentifyDecision, SensorInterrupt, WorkMode,
};
use bytes::BytesMut;
use tokio::sync::mpsc;
use whorl_core::{AuthToken, FingerId, GroupId};

/// Physical sensor device abstraction.
///
/// Covers the concerns that live outside the secure channel: supply power,
/// hard-reset the part, and deliver finger interrupts. The interrupt
/// receiver is taken exactly once, at coordinator construction, and is
/// owned by the event multiplexer from then on.
///
/// Power is scoped to one operation: a capture loop enables the device on
/// entry and disables it on every exit path.
pub trait SensorDevice: Send {
    /// Power the sensor on.
    async fn enable(&mut self) -> Result<()>;

    /// Power the sensor off.
    async fn disable(&mut self) -> Result<()>;

    /// Hard-reset the sensor. Used for status codes in the device-reset
    /// range, where a soft reset over the secure channel is not enough.
    async fn reset(&mut self) -> Result<()>;

    /// Take the interrupt receiver.
    ///
    /// Yields `Some` exactly once; subsequent calls return `None`.
    fn take_interrupts(&mut self) -> Option<mpsc::Receiver<SensorInterrupt>>;

    /// Get device information.
    async fn device_info(&self) -> Result<DeviceInfo>;
}

/// Identifier of a secure-channel command: a command group plus an opaque
/// command code within that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub group: u32,
    pub code: u32,
}

impl Command {
    pub const fn new(group: u32, code: u32) -> Self {
        Self { group, code }
    }
}

/// Raw request/response transport to the matching co-processor.
///
/// Commands are keyed by [`Command`]; the status code in the reply is
/// returned as data, with `Err` reserved for transport failures. The
/// bit-exact buffer layout behind this trait is not this crate's concern.
pub trait SecureChannel: Send {
    /// Send a command with an opaque payload; returns the status code.
    async fn send(&mut self, command: Command, payload: &[u8]) -> Result<i32>;

    /// Send a command whose reply carries extra data. The buffer holds the
    /// request payload on entry and the response payload on return.
    async fn send_with_buffer(&mut self, command: Command, buffer: &mut BytesMut) -> Result<i32>;
}

/// Typed operations the capture loops and the administrative service need
/// from the matching co-processor.
///
/// [`SecureMatcher`](crate::matcher::SecureMatcher) adapts these onto any
/// [`SecureChannel`]; the mock implements them directly from a script.
pub trait Matcher: Send {
    // Sensor-side controls routed through the co-processor:

    /// Set the sensor operating mode.
    async fn set_work_mode(&mut self, mode: WorkMode) -> Result<()>;

    /// Raise or drop the SPI link to the sensor.
    async fn set_spi(&mut self, enabled: bool) -> Result<()>;

    /// Recalibrate after a finger-lost event. Failure is not fatal to the
    /// running operation; the sensor is merely less precise.
    async fn calibrate(&mut self) -> Result<()>;

    // Capture:

    /// Acquire and classify one image.
    async fn acquire_image(&mut self) -> Result<CaptureOutcome>;

    /// Poll whether the finger has left the sensor. Returns
    /// [`CaptureOutcome::Lost`] once it has.
    async fn is_finger_lost(&mut self, poll_ms: u32) -> Result<CaptureOutcome>;

    // Enrollment:

    /// Begin an enroll session for the given secure user id.
    async fn init_enroll(&mut self, user_id: u64) -> Result<()>;

    /// Feed the last acquired image into the template under construction.
    async fn enroll_step(&mut self, finger_present: bool) -> Result<EnrollUpdate>;

    /// Close the enroll session. Must be called on every exit path.
    async fn finalize_enroll(&mut self) -> Result<()>;

    /// Persist a completed template under the given group and id.
    async fn save_enrolled_print(&mut self, group: GroupId, finger: FingerId) -> Result<()>;

    // Identification:

    /// Begin an identify session.
    async fn init_identify(&mut self) -> Result<()>;

    /// Match the last acquired image against the group's templates.
    async fn identify(&mut self, group: GroupId, challenge: u64) -> Result<IdentifyDecision>;

    /// Whether the last match improved the stored template.
    async fn update_template(&mut self) -> Result<bool>;

    /// Persist template improvements.
    async fn save_template(&mut self) -> Result<()>;

    /// Close the identify session. Must be called on every exit path.
    async fn finalize_identify(&mut self) -> Result<()>;

    // Template administration:

    /// List the enrolled finger ids in a group.
    async fn list_prints(&mut self, group: GroupId) -> Result<Vec<FingerId>>;

    /// Remove one enrolled template.
    async fn remove_print(&mut self, group: GroupId, finger: FingerId) -> Result<()>;

    /// Select the active template group.
    async fn set_group(&mut self, group: GroupId) -> Result<()>;

    /// Load the template database from backing storage.
    async fn load_database(&mut self, path: &str) -> Result<()>;

    /// Initialize an empty template database.
    async fn load_empty_database(&mut self) -> Result<()>;

    /// Store the template database to backing storage.
    async fn store_database(&mut self, path: &str) -> Result<()>;

    /// Stable identifier of the current template set. Changes whenever the
    /// set changes.
    async fn database_id(&mut self) -> Result<u64>;

    // Challenge and token handling:

    /// Produce a fresh enrollment challenge.
    async fn load_enroll_challenge(&mut self) -> Result<u64>;

    /// Verify a caller-supplied token authorizing enrollment.
    async fn verify_enroll_token(&mut self, token: &AuthToken) -> Result<()>;

    /// Install the challenge an authentication result token must answer.
    async fn set_auth_challenge(&mut self, challenge: u64) -> Result<()>;

    // Navigation:

    /// Whether the part supports gesture navigation.
    fn navigation_supported(&self) -> bool;

    /// Poll for a navigation gesture. `None` when nothing happened.
    async fn next_gesture(&mut self) -> Result<Option<Gesture>>;
}

/// Sink for gestures detected in navigation mode.
///
/// The real system forwards these as synthetic input events; that
/// machinery is outside this crate, so the coordinator only needs a place
/// to put them.
pub trait GestureSink: Send + Sync {
    fn emit(&self, gesture: Gesture);
}

/// A sink that drops every gesture.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGestureSink;

impl GestureSink for NullGestureSink {
    fn emit(&self, _gesture: Gesture) {}
}
