//! Collaborators the attendance core talks to but does not own.
//!
//! Rosters come from a class directory and audit entries go to a log
//! somewhere. Both are traits here so the server can plug in real
//! backends while tests use the in-memory ones below.
//!
//! Neither is ever called while a session lock is held: the roster is
//! fetched before a session exists, and audit entries are emitted after
//! the mutation has been committed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rollcall_protocol::{AggregateCounts, AttendanceStatus, ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

use crate::SessionError;

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// A snapshot of the participants expected at one session.
///
/// Mid-session roster edits are not reflected; a changed roster needs a
/// new session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    participants: Vec<ParticipantId>,
}

impl Roster {
    pub fn new(participants: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            participants: participants.into_iter().collect(),
        }
    }

    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

impl FromIterator<ParticipantId> for Roster {
    fn from_iter<I: IntoIterator<Item = ParticipantId>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Supplies the roster for a class or event.
///
/// Called once per session, before the session is created, so it may do
/// slow I/O freely.
///
/// ```rust
/// use rollcall_protocol::ParticipantId;
/// use rollcall_session::{Roster, RosterProvider, SessionError};
///
/// /// Every class has the same three students.
/// struct TinySchool;
///
/// impl RosterProvider for TinySchool {
///     async fn roster(&self, _class_ref: &str) -> Result<Roster, SessionError> {
///         Ok((1..=3).map(ParticipantId).collect())
///     }
/// }
/// ```
pub trait RosterProvider: Send + Sync + 'static {
    /// Returns the roster for `class_ref`, or
    /// [`SessionError::RosterUnavailable`] if there is none.
    fn roster(
        &self,
        class_ref: &str,
    ) -> impl std::future::Future<Output = Result<Roster, SessionError>> + Send;
}

/// Rosters held in memory, keyed by class reference. Backs the server's
/// configuration file and the tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    classes: HashMap<String, Roster>,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the roster for `class_ref`.
    pub fn insert(&mut self, class_ref: impl Into<String>, roster: Roster) {
        self.classes.insert(class_ref.into(), roster);
    }

    /// Chained form of [`insert`](Self::insert).
    pub fn with_class(mut self, class_ref: impl Into<String>, roster: Roster) -> Self {
        self.insert(class_ref, roster);
        self
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl RosterProvider for StaticRoster {
    async fn roster(&self, class_ref: &str) -> Result<Roster, SessionError> {
        self.classes
            .get(class_ref)
            .cloned()
            .ok_or_else(|| SessionError::RosterUnavailable(format!("no roster for class {class_ref:?}")))
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// What an administrator did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum AuditAction {
    Opened {
        class_ref: String,
        roster_size: usize,
    },
    Closed {
        counts: AggregateCounts,
    },
    StatusOverridden {
        participant_id: ParticipantId,
        from: AttendanceStatus,
        to: AttendanceStatus,
    },
    WindowExtended {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// One attributed administrative action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: SessionId,
    pub actor: String,
    pub action: AuditAction,
    pub at: DateTime<Utc>,
}

/// Receives audit entries after the action has taken effect.
///
/// Synchronous and infallible from the core's point of view: a sink that
/// talks to a slow backend should queue internally.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, entry: AuditEntry);
}

/// Writes audit entries as structured `tracing` events under the
/// `rollcall::audit` target, so they can be routed separately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        let AuditEntry {
            session_id,
            actor,
            action,
            at,
        } = entry;
        match action {
            AuditAction::Opened {
                class_ref,
                roster_size,
            } => tracing::info!(
                target: "rollcall::audit",
                %session_id, %actor, %at, %class_ref, roster_size,
                "session opened"
            ),
            AuditAction::Closed { counts } => tracing::info!(
                target: "rollcall::audit",
                %session_id, %actor, %at,
                present = counts.present,
                late = counts.late,
                absent = counts.absent,
                "session closed"
            ),
            AuditAction::StatusOverridden {
                participant_id,
                from,
                to,
            } => tracing::info!(
                target: "rollcall::audit",
                %session_id, %actor, %at, %participant_id, %from, %to,
                "status overridden"
            ),
            AuditAction::WindowExtended { from, to } => tracing::info!(
                target: "rollcall::audit",
                %session_id, %actor, %at, %from, %to,
                "window extended"
            ),
        }
    }
}
