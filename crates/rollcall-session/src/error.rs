//! Error types for the attendance core.

use chrono::{DateTime, Utc};
use rollcall_protocol::{AttendanceStatus, ErrorKind, ParticipantId, SessionId};

use crate::{LifecycleAction, LifecycleState};

/// Errors from session lifecycle, administration, and registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session with this id is registered.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The lifecycle state does not allow this operation, e.g. rotating a
    /// session that has not been activated.
    #[error("cannot {action} session {session_id} while {state}")]
    InvalidTransition {
        session_id: SessionId,
        state: LifecycleState,
        action: LifecycleAction,
    },

    /// `activate` was called before the window opened.
    #[error("session {session_id} opens at {opens_at}")]
    WindowNotOpen {
        session_id: SessionId,
        opens_at: DateTime<Utc>,
    },

    /// The participant is not on this session's roster.
    #[error("participant {participant_id} is not on the roster of session {session_id}")]
    UnknownParticipant {
        session_id: SessionId,
        participant_id: ParticipantId,
    },

    /// The session is not `Active`, so there is nothing to display.
    #[error("session {0} has no active token")]
    NoActiveToken(SessionId),

    /// The schedule or roster cannot form a valid session.
    #[error("invalid session plan: {0}")]
    InvalidPlan(String),

    /// The session is still live, or its retention window has not passed.
    #[error("session {session_id} cannot be evicted: {reason}")]
    NotEvictable {
        session_id: SessionId,
        reason: String,
    },

    /// The roster collaborator could not supply a roster.
    #[error("roster unavailable: {0}")]
    RosterUnavailable(String),

    /// The session failed its count invariant and has been halted.
    #[error("session {session_id} halted after invariant violation: {detail}")]
    InvariantViolation {
        session_id: SessionId,
        detail: String,
    },
}

impl SessionError {
    /// The wire-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::SessionNotFound,
            Self::InvalidTransition { .. } | Self::WindowNotOpen { .. } => {
                ErrorKind::InvalidTransition
            }
            Self::UnknownParticipant { .. } => ErrorKind::UnknownParticipant,
            Self::NoActiveToken(_) => ErrorKind::NoActiveToken,
            Self::InvalidPlan(_) => ErrorKind::InvalidPlan,
            Self::NotEvictable { .. } => ErrorKind::NotEvictable,
            Self::RosterUnavailable(_) => ErrorKind::RosterUnavailable,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
        }
    }
}

/// Reasons a scan is refused.
///
/// All but [`ScanError::InvariantViolation`] are expected outcomes that a
/// scanning client shows to its user. Only [`ScanError::TokenExpired`] is
/// worth retrying, because the display will have a fresh token by then.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("session {session_id} is not accepting scans ({state})")]
    SessionNotActive {
        session_id: SessionId,
        state: LifecycleState,
    },

    #[error("participant {participant_id} is not on the roster of session {session_id}")]
    UnknownParticipant {
        session_id: SessionId,
        participant_id: ParticipantId,
    },

    /// The token is past its expiry, or belongs to an earlier epoch.
    #[error("token for session {session_id} has expired (current epoch is {current_epoch})")]
    TokenExpired {
        session_id: SessionId,
        current_epoch: u64,
    },

    /// The token was never issued for this session.
    #[error("token does not match session {0}")]
    TokenMismatch(SessionId),

    #[error("participant {participant_id} is already recorded as {status} in session {session_id}")]
    AlreadyRecorded {
        session_id: SessionId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
    },

    #[error("session {session_id} halted after invariant violation: {detail}")]
    InvariantViolation {
        session_id: SessionId,
        detail: String,
    },
}

impl ScanError {
    /// Returns `true` if the scanning client should prompt a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TokenExpired { .. })
    }

    /// The wire-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::SessionNotActive { .. } => ErrorKind::SessionNotActive,
            Self::UnknownParticipant { .. } => ErrorKind::UnknownParticipant,
            Self::TokenExpired { .. } => ErrorKind::TokenExpired,
            Self::TokenMismatch(_) => ErrorKind::TokenMismatch,
            Self::AlreadyRecorded { .. } => ErrorKind::AlreadyRecorded,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_only_token_expired_is_retryable() {
        let expired = ScanError::TokenExpired {
            session_id: SessionId(1),
            current_epoch: 2,
        };
        assert!(expired.is_retryable());
        assert!(!ScanError::TokenMismatch(SessionId(1)).is_retryable());
        assert!(!ScanError::SessionNotFound(SessionId(1)).is_retryable());
    }

    #[test]
    fn test_scan_error_kind_matches_variant() {
        let err = ScanError::AlreadyRecorded {
            session_id: SessionId(1),
            participant_id: ParticipantId(2),
            status: AttendanceStatus::Present,
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyRecorded);
        assert_eq!(
            ScanError::TokenMismatch(SessionId(1)).kind(),
            ErrorKind::TokenMismatch
        );
    }

    #[test]
    fn test_session_error_display_names_state_and_action() {
        let err = SessionError::InvalidTransition {
            session_id: SessionId(4),
            state: LifecycleState::Ended,
            action: LifecycleAction::Rotate,
        };
        assert_eq!(err.to_string(), "cannot rotate session S-4 while Ended");
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
}
