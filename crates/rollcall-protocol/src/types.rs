//! Shared value types: identities, attendance statuses, counts, events.
//!
//! The attendance core produces these and the server puts them on the
//! wire unchanged.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier of one attendance session.
///
/// Newtype over `u64` so a `SessionId` can never be passed where a
/// `ParticipantId` is expected. `#[serde(transparent)]` keeps the wire
/// form a plain number: `SessionId(42)` is `42` in JSON.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Identifies one roster member.
///
/// The roster itself is owned by an external directory; the attendance
/// core only holds these references.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AttendanceStatus
// ---------------------------------------------------------------------------

/// Final classification of one participant in one session.
///
/// Every record starts as `Absent`. A successful scan moves it to
/// `Present` or `Late`; `Excused` and `Sick` are only reachable through
/// an audited manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Late,
    Excused,
    Sick,
    Absent,
}

impl AttendanceStatus {
    /// All statuses, in display order.
    pub const ALL: [AttendanceStatus; 5] = [
        Self::Present,
        Self::Late,
        Self::Excused,
        Self::Sick,
        Self::Absent,
    ];

    /// Returns `true` for the statuses a scan can produce.
    pub fn is_scan_derived(&self) -> bool {
        matches!(self, Self::Present | Self::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Present => "Present",
            Self::Late => "Late",
            Self::Excused => "Excused",
            Self::Sick => "Sick",
            Self::Absent => "Absent",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// AggregateCounts
// ---------------------------------------------------------------------------

/// Per-status tallies for one session.
///
/// `total` is the roster size. The attendance core guarantees
/// `present + late + excused + sick + absent == total` at every point a
/// caller can observe; [`is_consistent`](Self::is_consistent) checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateCounts {
    pub present: usize,
    pub late: usize,
    pub excused: usize,
    pub sick: usize,
    pub absent: usize,
    pub total: usize,
}

impl AggregateCounts {
    /// Counts for a freshly created session: everyone absent.
    pub fn all_absent(roster_size: usize) -> Self {
        Self {
            absent: roster_size,
            total: roster_size,
            ..Self::default()
        }
    }

    /// Recomputes counts from scratch over a set of statuses.
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = AttendanceStatus>,
    {
        let mut counts = Self::default();
        for status in statuses {
            *counts.slot_mut(status) += 1;
            counts.total += 1;
        }
        counts
    }

    /// Number of participants currently in `status`.
    pub fn get(&self, status: AttendanceStatus) -> usize {
        match status {
            AttendanceStatus::Present => self.present,
            AttendanceStatus::Late => self.late,
            AttendanceStatus::Excused => self.excused,
            AttendanceStatus::Sick => self.sick,
            AttendanceStatus::Absent => self.absent,
        }
    }

    /// Moves one participant from `from` to `to`.
    ///
    /// Saturates instead of panicking when `from` is already zero; the
    /// resulting sum mismatch is caught by the caller's invariant check.
    pub fn shift(&mut self, from: AttendanceStatus, to: AttendanceStatus) {
        if from == to {
            return;
        }
        let slot = self.slot_mut(from);
        *slot = slot.saturating_sub(1);
        *self.slot_mut(to) += 1;
    }

    /// Sum of the five status buckets.
    pub fn sum(&self) -> usize {
        self.present + self.late + self.excused + self.sick + self.absent
    }

    /// Returns `true` if the buckets add up to `total`.
    pub fn is_consistent(&self) -> bool {
        self.sum() == self.total
    }

    fn slot_mut(&mut self, status: AttendanceStatus) -> &mut usize {
        match status {
            AttendanceStatus::Present => &mut self.present,
            AttendanceStatus::Late => &mut self.late,
            AttendanceStatus::Excused => &mut self.excused,
            AttendanceStatus::Sick => &mut self.sick,
            AttendanceStatus::Absent => &mut self.absent,
        }
    }
}

// ---------------------------------------------------------------------------
// TokenDisplay
// ---------------------------------------------------------------------------

/// What a display screen needs to render the scannable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDisplay {
    /// The opaque token value to encode in the QR image.
    pub value: String,
    /// Rotation generation of this token.
    pub epoch: u64,
    /// Instant after which scans presenting this value are refused.
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Notifications published by the session registry after each state
/// change, for read-only subscribers such as live dashboards.
///
/// `#[serde(tag = "event")]` yields `{ "event": "Activated", ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// A session was created for a roster.
    Opened {
        session_id: SessionId,
        roster_size: usize,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    },

    /// The session window opened and the first token was issued.
    Activated {
        session_id: SessionId,
        epoch: u64,
        expires_at: DateTime<Utc>,
    },

    /// A new token replaced the previous one.
    TokenRotated {
        session_id: SessionId,
        epoch: u64,
        expires_at: DateTime<Utc>,
    },

    /// A participant's scan was accepted.
    ParticipantScanned {
        session_id: SessionId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
        counts: AggregateCounts,
    },

    /// An administrator changed a participant's status by hand.
    StatusOverridden {
        session_id: SessionId,
        participant_id: ParticipantId,
        from: AttendanceStatus,
        to: AttendanceStatus,
        actor: String,
        counts: AggregateCounts,
    },

    /// The session window end was pushed back.
    WindowExtended {
        session_id: SessionId,
        window_end: DateTime<Utc>,
    },

    /// The session stopped accepting scans.
    Ended {
        session_id: SessionId,
        counts: AggregateCounts,
    },

    /// The session was removed from the registry by the retention policy.
    Evicted { session_id: SessionId },
}

impl SessionEvent {
    /// The session this event belongs to.
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Opened { session_id, .. }
            | Self::Activated { session_id, .. }
            | Self::TokenRotated { session_id, .. }
            | Self::ParticipantScanned { session_id, .. }
            | Self::StatusOverridden { session_id, .. }
            | Self::WindowExtended { session_id, .. }
            | Self::Ended { session_id, .. }
            | Self::Evicted { session_id } => *session_id,
        }
    }
}
