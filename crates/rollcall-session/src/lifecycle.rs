//! Session lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// The lifecycle state of an attendance session.
///
/// Transitions are strictly ordered:
///
/// ```text
/// Scheduled → Active → Ended
///     └──────────────────┘  (administrative cancellation only)
/// ```
///
/// - **Scheduled**: the session exists, every participant is `Absent`,
///   no token has been issued yet.
/// - **Active**: the window is open. A token is live and rotates on the
///   session's cadence; scans are accepted.
/// - **Ended**: terminal. No token, no scans. Only manual status
///   overrides may still change records.
///
/// Cancelling a `Scheduled` session jumps straight to `Ended`, which is
/// equivalent to passing through `Active` with zero scans accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Scheduled,
    Active,
    Ended,
}

impl LifecycleState {
    /// Returns `true` if scans may be accepted in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` once the session can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }

    /// The state a normal (non-cancelling) transition leads to.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Scheduled => Some(Self::Active),
            Self::Active => Some(Self::Ended),
            Self::Ended => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid, counting
    /// cancellation (`Scheduled → Ended`) as valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (self == Self::Scheduled && target == Self::Ended)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "Scheduled"),
            Self::Active => write!(f, "Active"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleAction
// ---------------------------------------------------------------------------

/// The operation that was attempted when a transition was refused.
/// Carried by `SessionError::InvalidTransition` for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    Activate,
    Rotate,
    End,
    ExtendWindow,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activate => write!(f, "activate"),
            Self::Rotate => write!(f, "rotate"),
            Self::End => write!(f, "end"),
            Self::ExtendWindow => write!(f, "extend the window of"),
        }
    }
}
