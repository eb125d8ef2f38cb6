//! Coordinator state machine types.
//!
//! # States
//!
//! - `Invalid`: before the worker has been started.
//! - `Idle`: no operation running; the default handler may poll for
//!   passive gestures.
//! - `Paused`: no handler runs; the safe window for short administrative
//!   calls that need the device to themselves.
//! - `Enrolling` / `Authenticating`: a capture loop owns the device.
//! - `Stopped`: terminal. Every later transition request is rejected.
//!
//! Exactly one state is current at any instant, observed by the worker; a
//! pending [`TransitionRequest`] may hold a desired state the worker has
//! not consumed yet. A newer request overwrites an older unconsumed one:
//! a stale request describes an intention its requester has already
//! abandoned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use whorl_core::{FingerId, GroupId};

/// Operating state of the coordinator worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Worker not started yet.
    Invalid,

    /// No operation in progress.
    Idle,

    /// Operations excluded; administrative calls may touch the device.
    Paused,

    /// The enroll capture loop is running.
    Enrolling,

    /// The authenticate capture loop is running.
    Authenticating,

    /// Terminal: the worker has shut down.
    Stopped,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            OperationState::Invalid => "Invalid",
            OperationState::Idle => "Idle",
            OperationState::Paused => "Paused",
            OperationState::Enrolling => "Enrolling",
            OperationState::Authenticating => "Authenticating",
            OperationState::Stopped => "Stopped",
        };
        write!(f, "{}", state_str)
    }
}

impl OperationState {
    /// Check if a transition to the target state is permitted.
    ///
    /// `Stopped` is terminal and rejects everything. `Invalid` only
    /// leaves through an explicit start (to `Idle`) or shutdown. Nothing
    /// transitions back into `Invalid`. Everything else is permitted,
    /// including a same-state request, which the worker treats as a
    /// no-op wakeup.
    pub fn can_transition_to(&self, target: &OperationState) -> bool {
        match (self, target) {
            (OperationState::Stopped, _) => false,
            (_, OperationState::Invalid) => false,
            (OperationState::Invalid, OperationState::Idle | OperationState::Stopped) => true,
            (OperationState::Invalid, _) => false,
            _ => true,
        }
    }

    /// Whether a capture handler runs in this state.
    #[must_use]
    pub fn runs_handler(&self) -> bool {
        matches!(
            self,
            OperationState::Idle | OperationState::Enrolling | OperationState::Authenticating
        )
    }
}

/// Parameters staged for an enroll session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollParams {
    pub group: GroupId,
    /// Id the new template will be saved under.
    pub finger: FingerId,
    /// Secure user id from the verified auth token.
    pub user_id: u64,
    /// Per-wait deadline; `None` blocks indefinitely.
    pub timeout: Option<Duration>,
}

/// Parameters staged for an authenticate session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateParams {
    pub group: GroupId,
    /// Challenge the result token must answer.
    pub challenge: u64,
}

/// An operation the worker should begin, with everything the handler
/// needs to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Enroll(EnrollParams),
    Authenticate(AuthenticateParams),
}

impl OperationRequest {
    /// The state in which this operation's handler runs.
    #[must_use]
    pub fn target(&self) -> OperationState {
        match self {
            OperationRequest::Enroll(_) => OperationState::Enrolling,
            OperationRequest::Authenticate(_) => OperationState::Authenticating,
        }
    }
}

/// A desired state waiting for the worker to consume it.
///
/// At most one request is pending at a time (last writer wins).
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub target: OperationState,
    pub operation: Option<OperationRequest>,
}

impl TransitionRequest {
    /// A bare transition with no staged operation.
    pub fn to(target: OperationState) -> Self {
        Self {
            target,
            operation: None,
        }
    }

    /// A transition carrying operation parameters.
    pub fn operation(request: OperationRequest) -> Self {
        Self {
            target: request.target(),
            operation: Some(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_is_terminal() {
        for target in [
            OperationState::Invalid,
            OperationState::Idle,
            OperationState::Paused,
            OperationState::Enrolling,
            OperationState::Authenticating,
            OperationState::Stopped,
        ] {
            assert!(!OperationState::Stopped.can_transition_to(&target));
        }
    }

    #[test]
    fn test_invalid_only_starts_or_stops() {
        assert!(OperationState::Invalid.can_transition_to(&OperationState::Idle));
        assert!(OperationState::Invalid.can_transition_to(&OperationState::Stopped));
        assert!(!OperationState::Invalid.can_transition_to(&OperationState::Enrolling));
        assert!(!OperationState::Invalid.can_transition_to(&OperationState::Paused));
    }

    #[test]
    fn test_nothing_reenters_invalid() {
        assert!(!OperationState::Idle.can_transition_to(&OperationState::Invalid));
        assert!(!OperationState::Paused.can_transition_to(&OperationState::Invalid));
    }

    #[test]
    fn test_operational_transitions() {
        assert!(OperationState::Idle.can_transition_to(&OperationState::Enrolling));
        assert!(OperationState::Paused.can_transition_to(&OperationState::Authenticating));
        assert!(OperationState::Enrolling.can_transition_to(&OperationState::Idle));
        assert!(OperationState::Enrolling.can_transition_to(&OperationState::Paused));
        assert!(OperationState::Authenticating.can_transition_to(&OperationState::Stopped));
        // Same-state requests are no-op wakeups, not errors.
        assert!(OperationState::Idle.can_transition_to(&OperationState::Idle));
    }

    #[test]
    fn test_runs_handler() {
        assert!(OperationState::Idle.runs_handler());
        assert!(OperationState::Enrolling.runs_handler());
        assert!(OperationState::Authenticating.runs_handler());
        assert!(!OperationState::Paused.runs_handler());
        assert!(!OperationState::Stopped.runs_handler());
        assert!(!OperationState::Invalid.runs_handler());
    }

    #[test]
    fn test_request_target() {
        let enroll = OperationRequest::Enroll(EnrollParams {
            group: GroupId::new(0),
            finger: FingerId::new(1),
            user_id: 9,
            timeout: None,
        });
        assert_eq!(enroll.target(), OperationState::Enrolling);

        let auth = OperationRequest::Authenticate(AuthenticateParams {
            group: GroupId::new(0),
            challenge: 5,
        });
        assert_eq!(auth.target(), OperationState::Authenticating);
    }

    #[test]
    fn test_state_serialization() {
        let state = OperationState::Authenticating;
        let serialized = serde_json::to_string(&state).unwrap();
        assert_eq!(serialized, "\"authenticating\"");

        let deserialized: OperationState = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, state);
    }
}
