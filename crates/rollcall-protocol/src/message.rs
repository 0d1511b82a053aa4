//! Wire messages exchanged between the Rollcall server and its clients.
//!
//! Three kinds of client talk to the server over the same envelope:
//! scanning clients (submit a token), display screens (render the current
//! token and live counts), and administrators (open, close, override).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AggregateCounts, AttendanceStatus, ParticipantId, SessionEvent, SessionId,
};

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable reason attached to every error reply.
///
/// Clients switch on this instead of parsing the message text. Only
/// [`ErrorKind::TokenExpired`] is worth retrying: the display will show
/// a fresh token and the next attempt can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidTransition,
    InvalidPlan,
    SessionNotFound,
    UnknownParticipant,
    SessionNotActive,
    TokenExpired,
    TokenMismatch,
    AlreadyRecorded,
    NoActiveToken,
    InvariantViolation,
    NotEvictable,
    RosterUnavailable,
    Unauthorized,
    Forbidden,
    BadRequest,
}

impl ErrorKind {
    /// Returns `true` if the client should prompt the user to try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Every payload that can travel inside an [`Envelope`].
///
/// `#[serde(tag = "type")]` produces internally tagged JSON such as
/// `{ "type": "SubmitScan", "session_id": 1, "token": "…", "participant_id": 7 }`,
/// which is easy to build from JavaScript on a phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    // -- Connection lifecycle --
    /// Client → Server: first message on every connection.
    Handshake { version: u32, token: Option<String> },

    /// Server → Client: the handshake token was accepted.
    HandshakeAck { actor: String, server_time: u64 },

    /// Client → Server: keep-alive.
    Heartbeat { client_time: u64 },

    /// Server → Client: keep-alive reply echoing the client clock.
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Either direction: the connection is about to close.
    Disconnect { reason: String },

    // -- Administration --
    /// Admin → Server: open a session for a class roster. Omitted periods
    /// fall back to the server's configured defaults.
    OpenSession {
        class_ref: String,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        #[serde(default)]
        rotation_secs: Option<u64>,
        #[serde(default)]
        grace_secs: Option<u64>,
    },

    /// Server → Admin: the session exists and is `Scheduled`.
    SessionOpened {
        session_id: SessionId,
        roster_size: usize,
    },

    /// Admin → Server: end the session now.
    CloseSession { session_id: SessionId },

    /// Server → Admin: the session is `Ended`.
    SessionClosed {
        session_id: SessionId,
        counts: AggregateCounts,
    },

    /// Admin → Server: push back the end of an active session.
    ExtendWindow {
        session_id: SessionId,
        window_end: DateTime<Utc>,
    },

    /// Server → Admin: the new window end is in effect.
    WindowExtended {
        session_id: SessionId,
        window_end: DateTime<Utc>,
    },

    /// Admin → Server: set a participant's status by hand.
    OverrideStatus {
        session_id: SessionId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
    },

    /// Server → Admin: the override was applied.
    StatusOverridden {
        session_id: SessionId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
        counts: AggregateCounts,
    },

    // -- Scanning --
    /// Scanner → Server: present the token read from the display.
    SubmitScan {
        session_id: SessionId,
        token: String,
        participant_id: ParticipantId,
    },

    /// Server → Scanner: the scan was recorded.
    ScanAccepted {
        session_id: SessionId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
        epoch: u64,
        counts: AggregateCounts,
    },

    // -- Read side --
    /// Client → Server: current aggregate counts.
    GetCounts { session_id: SessionId },

    /// Server → Client: reply to [`Message::GetCounts`].
    Counts {
        session_id: SessionId,
        counts: AggregateCounts,
    },

    /// Display → Server: the token to render right now.
    GetToken { session_id: SessionId },

    /// Server → Display: reply to [`Message::GetToken`].
    Token {
        session_id: SessionId,
        value: String,
        epoch: u64,
        expires_at: DateTime<Utc>,
    },

    /// Client → Server: ids of all `Active` sessions.
    ListActive,

    /// Server → Client: reply to [`Message::ListActive`].
    ActiveSessions { sessions: Vec<SessionId> },

    /// Client → Server: stream [`SessionEvent`]s for one session.
    Subscribe { session_id: SessionId },

    /// Client → Server: stop streaming events for one session.
    Unsubscribe { session_id: SessionId },

    /// Server → Client: the subscription is live.
    Subscribed { session_id: SessionId },

    /// Server → Client: a pushed session event.
    Event { event: SessionEvent },

    // -- Errors --
    /// Server → Client: the request failed. `code` follows HTTP
    /// conventions, `kind` is the machine-readable reason.
    Error {
        code: u16,
        kind: ErrorKind,
        message: String,
        retry: bool,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level wire wrapper. Every frame on the socket is one Envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-sender sequence number. Replies are not correlated by this
    /// field; each side just counts up.
    pub seq: u64,

    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,

    /// The message itself.
    pub payload: Message,
}
