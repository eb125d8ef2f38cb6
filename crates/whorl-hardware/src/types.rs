//! Typed results exchanged between the capture loops and the hardware
//! layer.
//!
//! The secure channel reports most conditions as status codes rather than
//! transport errors; this module gives those codes closed enum forms so
//! the loops can match on them instead of comparing integers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use whorl_core::{AuthToken, FingerId};

/// Classification of one image acquisition attempt.
///
/// `Partial` and `ImagerDirty` are the degraded outcomes subject to the
/// bounded local retry policy. `Lost` is only produced by the finger-lost
/// poll. Codes outside the known set surface as `Error` and carry the raw
/// status for logging and reset-range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Usable image; proceed to the match or enroll step.
    Good,
    /// Finger moved before the imager finished.
    TooFast,
    /// Incomplete coverage of the imager.
    Partial,
    /// Contamination on the imager surface.
    ImagerDirty,
    /// Nothing usable on the sensor.
    Nothing,
    /// The finger has left the sensor.
    Lost,
    /// Unrecognized status code.
    Error(i32),
}

impl CaptureOutcome {
    /// Map a raw secure-channel status code onto the closed set.
    pub fn from_status(code: i32) -> Self {
        match code {
            0 => Self::Good,
            2 => Self::TooFast,
            6 => Self::Lost,
            7 | 9 => Self::ImagerDirty,
            8 => Self::Partial,
            1 | 3 | 10 => Self::Nothing,
            other => Self::Error(other),
        }
    }

    /// Raw status code for this outcome (inverse of [`from_status`] for
    /// the known set).
    ///
    /// [`from_status`]: CaptureOutcome::from_status
    #[must_use]
    pub fn as_status(&self) -> i32 {
        match self {
            Self::Good => 0,
            Self::TooFast => 2,
            Self::Lost => 6,
            Self::ImagerDirty => 7,
            Self::Partial => 8,
            Self::Nothing => 10,
            Self::Error(code) => *code,
        }
    }

    /// Whether this outcome is subject to the bounded re-image retry.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Partial | Self::ImagerDirty)
    }
}

impl fmt::Display for CaptureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "Good"),
            Self::TooFast => write!(f, "TooFast"),
            Self::Partial => write!(f, "Partial"),
            Self::ImagerDirty => write!(f, "ImagerDirty"),
            Self::Nothing => write!(f, "Nothing"),
            Self::Lost => write!(f, "Lost"),
            Self::Error(code) => write!(f, "Error({code})"),
        }
    }
}

/// Sensor operating mode set through the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    Detect,
    Sleep,
    NavigationDetect,
}

impl WorkMode {
    /// Wire value of this mode.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Detect => 1,
            Self::Sleep => 2,
            Self::NavigationDetect => 3,
        }
    }
}

/// Gesture detected while the sensor is in navigation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Up,
    Down,
    Left,
    Right,
    DoubleTap,
    Hold,
}

/// One hardware interrupt from the sensor.
///
/// The payload is only a timestamp: the interrupt means "the sensor has
/// something to report", and the capture loop asks the secure channel
/// what that is.
#[derive(Debug, Clone, Copy)]
pub struct SensorInterrupt {
    pub at: DateTime<Utc>,
}

impl SensorInterrupt {
    pub fn now() -> Self {
        Self { at: Utc::now() }
    }
}

/// Result of one enroll step.
///
/// `percentage` is the secure channel's view of overall progress; the
/// enroll loop clamps it monotonic before reporting. The movement and
/// score fields are diagnostics and only reach the logs.
#[derive(Debug, Clone, Copy)]
pub struct EnrollUpdate {
    pub outcome: CaptureOutcome,
    pub percentage: u8,
    pub dx: i32,
    pub dy: i32,
    pub score: i32,
}

impl EnrollUpdate {
    /// A successful step that advanced progress to `percentage`.
    pub fn advanced(percentage: u8) -> Self {
        Self {
            outcome: CaptureOutcome::Good,
            percentage,
            dx: 0,
            dy: 0,
            score: 0,
        }
    }
}

/// Decision from one identification attempt.
#[derive(Debug, Clone)]
pub enum IdentifyDecision {
    /// The image matched an enrolled template.
    Match {
        finger: FingerId,
        score: i32,
        token: AuthToken,
    },
    /// The image was conclusive and matched nothing.
    NoMatch,
    /// Not conclusive; the loop should take another image.
    Retry(CaptureOutcome),
}

/// Device information metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device name.
    pub name: String,

    /// Device model.
    pub model: String,

    /// Firmware version, if known.
    pub firmware_version: Option<String>,
}

impl DeviceInfo {
    /// Create new device information.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            firmware_version: None,
        }
    }

    /// Set the firmware version.
    #[must_use]
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }
}
