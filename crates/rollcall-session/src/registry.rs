//! Session registry: creates, tracks, and evicts attendance sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use rollcall_protocol::{
    AggregateCounts, AttendanceStatus, ParticipantId, SessionEvent, SessionId, TokenDisplay,
};
use rollcall_token::{HmacTokenGenerator, TokenGenerator};
use tokio::sync::broadcast;

use crate::{
    AttendanceSession, AuditAction, AuditEntry, AuditSink, LifecycleState, Roster,
    RosterProvider, SessionError, SessionSchedule, StatusChange, TracingAuditSink,
};

/// Default capacity of the event channel. Subscribers that fall further
/// behind than this lose the oldest events.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// All live sessions, keyed by id.
///
/// This is the only structure shared across sessions. Lookups go through a
/// sharded concurrent map, so scans for unrelated sessions never block
/// each other; the map is never touched while a session lock is held.
///
/// The registry is also where administrative actions are attributed
/// (via the [`AuditSink`]) and where [`SessionEvent`]s are broadcast.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<AttendanceSession>>,
    next_id: AtomicU64,
    tokens: Arc<dyn TokenGenerator>,
    audit: Arc<dyn AuditSink>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(tokens: Arc<dyn TokenGenerator>, audit: Arc<dyn AuditSink>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            tokens,
            audit,
            events,
        }
    }

    /// A registry with a random token key and tracing-based audit log.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(HmacTokenGenerator::with_random_secret()),
            Arc::new(TracingAuditSink),
        )
    }

    // -- Creation -----------------------------------------------------------

    /// Registers a new `Scheduled` session for `roster`.
    pub fn create(
        &self,
        roster: &Roster,
        schedule: &SessionSchedule,
    ) -> Result<SessionId, SessionError> {
        let session_id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session =
            AttendanceSession::new(session_id, roster, schedule, Arc::clone(&self.tokens))?;
        self.sessions.insert(session_id, Arc::new(session));

        self.publish(SessionEvent::Opened {
            session_id,
            roster_size: roster.len(),
            window_start: schedule.window_start,
            window_end: schedule.window_end,
        });
        Ok(session_id)
    }

    /// Fetches the roster for `class_ref` and registers a session for it.
    ///
    /// The roster lookup completes before anything is locked.
    pub async fn open<P: RosterProvider>(
        &self,
        provider: &P,
        class_ref: &str,
        schedule: &SessionSchedule,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionId, SessionError> {
        let roster = provider.roster(class_ref).await?;
        let session_id = self.create(&roster, schedule)?;

        self.audit.record(AuditEntry {
            session_id,
            actor: actor.to_owned(),
            action: AuditAction::Opened {
                class_ref: class_ref.to_owned(),
                roster_size: roster.len(),
            },
            at: now,
        });
        Ok(session_id)
    }

    // -- Lookup -------------------------------------------------------------

    pub fn get(&self, session_id: SessionId) -> Option<Arc<AttendanceSession>> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, session_id: SessionId) -> Result<Arc<AttendanceSession>, SessionError> {
        self.get(session_id).ok_or(SessionError::NotFound(session_id))
    }

    /// Ids of all `Active` sessions, produced lazily.
    ///
    /// Each map shard is read-locked only while the iterator is inside it;
    /// don't hold the iterator across an `.await`.
    pub fn list_active(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions
            .iter()
            .filter(|entry| entry.value().state() == LifecycleState::Active)
            .map(|entry| *entry.key())
    }

    /// Sessions that are not `Ended` yet. Cloned out of the map so the
    /// caller can lock them freely.
    pub fn live_sessions(&self) -> Vec<Arc<AttendanceSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| !session.state().is_terminal())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // -- Administration -----------------------------------------------------

    /// Ends a session now (cancelling it if still `Scheduled`).
    pub fn close(
        &self,
        session_id: SessionId,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<AggregateCounts, SessionError> {
        let counts = self.require(session_id)?.end(now)?;

        self.audit.record(AuditEntry {
            session_id,
            actor: actor.to_owned(),
            action: AuditAction::Closed { counts },
            at: now,
        });
        self.publish(SessionEvent::Ended { session_id, counts });
        Ok(counts)
    }

    /// Sets a participant's status by hand and attributes it to `actor`.
    pub fn override_status(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, SessionError> {
        let change = self
            .require(session_id)?
            .override_status(participant_id, status, actor)?;

        self.audit.record(AuditEntry {
            session_id,
            actor: actor.to_owned(),
            action: AuditAction::StatusOverridden {
                participant_id,
                from: change.from,
                to: change.to,
            },
            at: now,
        });
        self.publish(SessionEvent::StatusOverridden {
            session_id,
            participant_id,
            from: change.from,
            to: change.to,
            actor: actor.to_owned(),
            counts: change.counts,
        });
        Ok(change)
    }

    /// Pushes back the end of an `Active` session.
    pub fn extend_window(
        &self,
        session_id: SessionId,
        window_end: DateTime<Utc>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let previous = self.require(session_id)?.extend_window(window_end)?;

        self.audit.record(AuditEntry {
            session_id,
            actor: actor.to_owned(),
            action: AuditAction::WindowExtended {
                from: previous,
                to: window_end,
            },
            at: now,
        });
        self.publish(SessionEvent::WindowExtended {
            session_id,
            window_end,
        });
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    pub fn aggregate_counts(&self, session_id: SessionId) -> Result<AggregateCounts, SessionError> {
        self.require(session_id)?.aggregate_counts()
    }

    pub fn current_token_display(
        &self,
        session_id: SessionId,
    ) -> Result<TokenDisplay, SessionError> {
        self.require(session_id)?.current_token_display()
    }

    // -- Retention ----------------------------------------------------------

    /// Removes an `Ended` session once `retention` has passed since it
    /// ended.
    pub fn evict(
        &self,
        session_id: SessionId,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let session = self.require(session_id)?;
        evictable(&session, retention, now).map_err(|reason| SessionError::NotEvictable {
            session_id,
            reason,
        })?;

        self.sessions.remove(&session_id);
        tracing::info!(%session_id, "session evicted");
        self.publish(SessionEvent::Evicted { session_id });
        Ok(())
    }

    /// Evicts every session past its retention window. Returns the ids
    /// that were removed.
    pub fn evict_expired(&self, retention: Duration, now: DateTime<Utc>) -> Vec<SessionId> {
        // Collect first: removing while iterating would deadlock on the
        // shard lock.
        let due: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| evictable(entry.value(), retention, now).is_ok())
            .map(|entry| *entry.key())
            .collect();

        due.into_iter()
            .filter(|&session_id| self.evict(session_id, retention, now).is_ok())
            .collect()
    }

    // -- Events -------------------------------------------------------------

    /// A receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Broadcasts an event. Having no subscribers is not an error.
    pub(crate) fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

fn evictable(
    session: &AttendanceSession,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let snapshot = session.snapshot();
    let Some(ended_at) = snapshot.ended_at else {
        return Err(format!("session is still {}", snapshot.state));
    };
    let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
    match ended_at.checked_add_signed(retention) {
        Some(expires) if expires <= now => Ok(()),
        _ => Err("retention window has not elapsed".into()),
    }
}
