use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Identifier of an enrolled template.
///
/// Finger id `0` is reserved: listeners receive it to mean "no finger"
/// (an unrecognized authentication attempt, or the empty-set marker in an
/// enumeration), and removal requests use it to address every template in
/// the active group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerId(u32);

impl FingerId {
    /// The reserved "no finger" / "all fingers" id.
    pub const NONE: FingerId = FingerId(0);

    pub fn new(id: u32) -> Self {
        FingerId(id)
    }

    /// Get the raw id.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this is the reserved id.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FingerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a template group (one group per user profile).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    pub fn new(id: u32) -> Self {
        GroupId(id)
    }

    /// Get the raw id.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticator type recorded in an [`AuthToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatorType {
    None,
    Password,
    Fingerprint,
}

/// Hardware authentication token exchanged with the secure channel.
///
/// Produced by the secure channel on a successful match and consumed by
/// the external authenticator framework. The enrollment path verifies a
/// caller-supplied token before an enroll session may begin.
///
/// # Security
/// The hmac is compared in constant time to avoid leaking prefix
/// information through timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub challenge: u64,
    pub user_id: u64,
    pub authenticator_id: u64,
    pub authenticator_type: AuthenticatorType,
    pub timestamp: u64,
    pub hmac: [u8; 32],
}

impl AuthToken {
    /// A zeroed token, used when no challenge has been set and the secure
    /// channel should not be bothered for an "invalid" response token.
    pub fn empty() -> Self {
        Self {
            challenge: 0,
            user_id: 0,
            authenticator_id: 0,
            authenticator_type: AuthenticatorType::None,
            timestamp: 0,
            hmac: [0; 32],
        }
    }

    /// Start building a token for the given challenge.
    pub fn for_challenge(challenge: u64) -> Self {
        Self {
            challenge,
            authenticator_type: AuthenticatorType::Fingerprint,
            ..Self::empty()
        }
    }

    /// Constant-time comparison of the hmac fields.
    #[must_use]
    pub fn hmac_matches(&self, other: &AuthToken) -> bool {
        self.hmac.ct_eq(&other.hmac).into()
    }
}
