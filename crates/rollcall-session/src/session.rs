//! The attendance session aggregate.
//!
//! Everything that can change about a session (its lifecycle state, the
//! live token, the records, the counts) sits behind one fair mutex.
//! Waiters are handed the lock in arrival order, so racing scans are
//! decided first come, first served. Critical sections only touch memory;
//! events and audit entries are emitted by the caller after the guard is
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{FairMutex, FairMutexGuard};
use rollcall_protocol::{
    AggregateCounts, AttendanceStatus, ParticipantId, SessionId, TokenDisplay,
};
use rollcall_token::{ScanToken, TokenGenerator};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::processor::{self, ScanReceipt};
use crate::schedule::SessionTiming;
use crate::{
    AttendanceRecord, LifecycleAction, LifecycleState, Roster, ScanError, SessionError,
    SessionSchedule,
};

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// A state change made by [`AttendanceSession::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `Scheduled → Active`, with the epoch-1 token.
    Activated(TokenDisplay),
    /// A new token replaced the previous one.
    Rotated(TokenDisplay),
    /// `Active → Ended`, with the final counts.
    Ended(AggregateCounts),
}

/// The outcome of a manual status override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub participant_id: ParticipantId,
    pub from: AttendanceStatus,
    pub to: AttendanceStatus,
    pub counts: AggregateCounts,
}

/// A consistent, point-in-time view of a session, taken under its lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: LifecycleState,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Epoch of the most recently issued token; 0 before activation.
    pub epoch: u64,
    pub counts: AggregateCounts,
    pub ended_at: Option<DateTime<Utc>>,
    pub halted: bool,
}

// ---------------------------------------------------------------------------
// Locked state
// ---------------------------------------------------------------------------

/// Everything guarded by the session lock.
#[derive(Debug)]
pub(crate) struct SessionInner {
    pub(crate) state: LifecycleState,
    pub(crate) window_end: DateTime<Utc>,
    /// Epoch of the latest token issued. Strictly increasing.
    pub(crate) epoch: u64,
    /// The live token. `Some` exactly while `Active`.
    pub(crate) current: Option<ScanToken>,
    /// When the live token is due to be replaced.
    pub(crate) rotate_at: Option<DateTime<Utc>>,
    /// Values of replaced tokens, mapped to their epoch. Only the last
    /// [`RETIRED_TOKEN_LIMIT`] epochs are kept; older replays read as a
    /// mismatch.
    pub(crate) retired: HashMap<String, u64>,
    pub(crate) records: HashMap<ParticipantId, AttendanceRecord>,
    /// Maintained incrementally alongside `records`.
    pub(crate) counts: AggregateCounts,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    /// Set once an invariant check fails. Never cleared.
    pub(crate) halted: Option<String>,
}

impl SessionInner {
    /// Remembers `token` as replaced, forgetting epochs that fell out of
    /// the retention limit.
    fn retire(&mut self, token: ScanToken) {
        self.retired.insert(token.value, token.epoch);
        if self.retired.len() as u64 > RETIRED_TOKEN_LIMIT {
            let oldest_kept = token.epoch.saturating_sub(RETIRED_TOKEN_LIMIT - 1);
            self.retired.retain(|_, epoch| *epoch >= oldest_kept);
        }
    }
}

/// How many replaced token values a session remembers.
pub const RETIRED_TOKEN_LIMIT: u64 = 256;

// ---------------------------------------------------------------------------
// AttendanceSession
// ---------------------------------------------------------------------------

/// One time-boxed attendance session for a fixed roster.
///
/// All mutating operations take the current instant explicitly; the
/// session never reads a clock. Share it as `Arc<AttendanceSession>`: every
/// method takes `&self` and serializes through the internal lock.
pub struct AttendanceSession {
    id: SessionId,
    roster_target_count: usize,
    timing: SessionTiming,
    tokens: Arc<dyn TokenGenerator>,
    inner: FairMutex<SessionInner>,
}

impl AttendanceSession {
    /// Creates a `Scheduled` session with every roster member `Absent`.
    ///
    /// Fails with [`SessionError::InvalidPlan`] if the schedule is invalid
    /// or the roster lists a participant twice.
    pub fn new(
        id: SessionId,
        roster: &Roster,
        schedule: &SessionSchedule,
        tokens: Arc<dyn TokenGenerator>,
    ) -> Result<Self, SessionError> {
        let timing = schedule.validate()?;

        let mut records = HashMap::with_capacity(roster.len());
        for &participant_id in roster.participants() {
            if records
                .insert(participant_id, AttendanceRecord::absent(participant_id))
                .is_some()
            {
                return Err(SessionError::InvalidPlan(format!(
                    "participant {participant_id} appears twice in the roster"
                )));
            }
        }
        let roster_target_count = records.len();

        info!(
            session_id = %id,
            roster_size = roster_target_count,
            window_start = %schedule.window_start,
            window_end = %schedule.window_end,
            "session scheduled"
        );

        Ok(Self {
            id,
            roster_target_count,
            timing,
            tokens,
            inner: FairMutex::new(SessionInner {
                state: LifecycleState::Scheduled,
                window_end: schedule.window_end,
                epoch: 0,
                current: None,
                rotate_at: None,
                retired: HashMap::new(),
                records,
                counts: AggregateCounts::all_absent(roster_target_count),
                ended_at: None,
                halted: None,
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Number of participants on the roster. Fixed at creation.
    pub fn roster_target_count(&self) -> usize {
        self.roster_target_count
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.timing.window_start
    }

    /// Last instant (inclusive) at which a scan counts as `Present`.
    pub fn present_deadline(&self) -> DateTime<Utc> {
        self.timing.present_deadline
    }

    pub fn rotation_period(&self) -> TimeDelta {
        self.timing.rotation_period
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.inner.lock().window_end
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().ended_at
    }

    pub fn is_halted(&self) -> bool {
        self.inner.lock().halted.is_some()
    }

    /// A consistent view of the session. Works on halted sessions too.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            session_id: self.id,
            state: inner.state,
            window_start: self.timing.window_start,
            window_end: inner.window_end,
            epoch: inner.epoch,
            counts: inner.counts,
            ended_at: inner.ended_at,
            halted: inner.halted.is_some(),
        }
    }

    // -- Lifecycle ----------------------------------------------------------

    /// `Scheduled → Active`. Issues the epoch-1 token.
    ///
    /// Fails with [`SessionError::WindowNotOpen`] before `window_start` and
    /// with [`SessionError::InvalidTransition`] from any other state.
    pub fn activate(&self, now: DateTime<Utc>) -> Result<TokenDisplay, SessionError> {
        let mut guard = self.lock_live()?;
        self.activate_locked(&mut guard, now)
    }

    /// Replaces the live token with one at `epoch + 1`.
    ///
    /// Returns `Ok(None)` without rotating once `now >= window_end`; the
    /// session should be ended instead.
    pub fn rotate(&self, now: DateTime<Utc>) -> Result<Option<TokenDisplay>, SessionError> {
        let mut guard = self.lock_live()?;
        self.rotate_locked(&mut guard, now)
    }

    /// Moves the session to `Ended` from `Scheduled` (cancellation) or
    /// `Active`. The live token is withdrawn; records are left as they are.
    pub fn end(&self, now: DateTime<Utc>) -> Result<AggregateCounts, SessionError> {
        let mut guard = self.lock_live()?;
        self.end_locked(&mut guard, now)
    }

    /// Applies every transition that is due at `now`.
    ///
    /// Called by the sweep. A `Scheduled` session whose whole window has
    /// already passed is activated and ended in the same call.
    pub fn advance(&self, now: DateTime<Utc>) -> Result<Vec<Transition>, SessionError> {
        let mut guard = self.lock_live()?;
        let inner = &mut *guard;
        let mut transitions = Vec::new();

        if inner.state == LifecycleState::Scheduled && now >= self.timing.window_start {
            transitions.push(Transition::Activated(self.activate_locked(inner, now)?));
        }

        if inner.state == LifecycleState::Active {
            if now >= inner.window_end {
                transitions.push(Transition::Ended(self.end_locked(inner, now)?));
            } else if inner.rotate_at.is_some_and(|due| now >= due) {
                if let Some(display) = self.rotate_locked(inner, now)? {
                    transitions.push(Transition::Rotated(display));
                }
            }
        }

        Ok(transitions)
    }

    /// Pushes back the end of an `Active` session.
    ///
    /// `new_end` must be strictly later than the current end. Returns the
    /// previous end.
    pub fn extend_window(
        &self,
        new_end: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SessionError> {
        let mut guard = self.lock_live()?;
        let inner = &mut *guard;

        if inner.state != LifecycleState::Active {
            return Err(self.invalid(inner.state, LifecycleAction::ExtendWindow));
        }
        if new_end <= inner.window_end {
            return Err(SessionError::InvalidPlan(format!(
                "new window end {new_end} is not after {}",
                inner.window_end
            )));
        }

        let previous = inner.window_end;
        inner.window_end = new_end;

        // A token clamped to the old end would otherwise expire before
        // its rotation is due.
        if let (Some(token), Some(due)) = (inner.current.as_mut(), inner.rotate_at) {
            token.expires_at = self.expiry_for(due, new_end);
        }

        info!(session_id = %self.id, from = %previous, to = %new_end, "window extended");
        Ok(previous)
    }

    // -- Attendance ---------------------------------------------------------

    /// Validates and records one scan. The only path that sets a
    /// scan-derived status.
    pub fn record_scan(
        &self,
        participant_id: ParticipantId,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanReceipt, ScanError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(detail) = &inner.halted {
            return Err(ScanError::InvariantViolation {
                session_id: self.id,
                detail: detail.clone(),
            });
        }

        let receipt =
            processor::apply_scan(self.id, &self.timing, inner, participant_id, presented, now)?;

        self.check_invariant(inner)
            .map_err(|detail| ScanError::InvariantViolation {
                session_id: self.id,
                detail,
            })?;
        Ok(receipt)
    }

    /// Sets a participant's status by hand, in any lifecycle state.
    ///
    /// A previously accepted scan keeps its `scan_time`, so the participant
    /// still cannot scan again.
    pub fn override_status(
        &self,
        participant_id: ParticipantId,
        status: AttendanceStatus,
        actor: &str,
    ) -> Result<StatusChange, SessionError> {
        let mut guard = self.lock_live()?;
        let inner = &mut *guard;

        let record = inner
            .records
            .get_mut(&participant_id)
            .ok_or(SessionError::UnknownParticipant {
                session_id: self.id,
                participant_id,
            })?;
        let from = record.status;
        record.status = status;
        record.overridden_by = Some(actor.to_owned());
        inner.counts.shift(from, status);

        self.check_invariant(inner).map_err(|detail| self.violation(detail))?;

        info!(
            session_id = %self.id,
            %participant_id,
            %from,
            to = %status,
            %actor,
            "status overridden"
        );

        Ok(StatusChange {
            participant_id,
            from,
            to: status,
            counts: inner.counts,
        })
    }

    // -- Reads --------------------------------------------------------------

    /// Current counts. Always sums to the roster size.
    pub fn aggregate_counts(&self) -> Result<AggregateCounts, SessionError> {
        Ok(self.lock_live()?.counts)
    }

    /// The token a display should render right now.
    ///
    /// Fails with [`SessionError::NoActiveToken`] unless `Active`.
    pub fn current_token_display(&self) -> Result<TokenDisplay, SessionError> {
        let inner = self.lock_live()?;
        match (&inner.state, &inner.current) {
            (LifecycleState::Active, Some(token)) => Ok(token.display()),
            _ => Err(SessionError::NoActiveToken(self.id)),
        }
    }

    pub fn record(&self, participant_id: ParticipantId) -> Option<AttendanceRecord> {
        self.inner.lock().records.get(&participant_id).cloned()
    }

    /// Every record, ordered by participant id.
    pub fn records(&self) -> Vec<AttendanceRecord> {
        let mut records: Vec<_> = self.inner.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.participant_id.0);
        records
    }

    /// Recounts every record from scratch and compares with the running
    /// counts, halting the session on a mismatch.
    pub fn verify_counts(&self) -> Result<AggregateCounts, SessionError> {
        let mut guard = self.lock_live()?;
        self.recount(&mut guard).map_err(|detail| self.violation(detail))
    }

    // -- Internals ----------------------------------------------------------

    /// Locks the session, refusing if it has been halted.
    fn lock_live(&self) -> Result<FairMutexGuard<'_, SessionInner>, SessionError> {
        let guard = self.inner.lock();
        if let Some(detail) = guard.halted.clone() {
            return Err(self.violation(detail));
        }
        Ok(guard)
    }

    fn activate_locked(
        &self,
        inner: &mut SessionInner,
        now: DateTime<Utc>,
    ) -> Result<TokenDisplay, SessionError> {
        if inner.state != LifecycleState::Scheduled {
            return Err(self.invalid(inner.state, LifecycleAction::Activate));
        }
        if now < self.timing.window_start {
            return Err(SessionError::WindowNotOpen {
                session_id: self.id,
                opens_at: self.timing.window_start,
            });
        }

        inner.state = LifecycleState::Active;
        let issued = self.issue_locked(inner, now, add(now, self.timing.rotation_period));

        info!(
            session_id = %self.id,
            epoch = issued.epoch,
            expires_at = %issued.expires_at,
            "session activated"
        );
        Ok(issued)
    }

    fn rotate_locked(
        &self,
        inner: &mut SessionInner,
        now: DateTime<Utc>,
    ) -> Result<Option<TokenDisplay>, SessionError> {
        if inner.state != LifecycleState::Active {
            return Err(self.invalid(inner.state, LifecycleAction::Rotate));
        }
        if now >= inner.window_end {
            debug!(session_id = %self.id, "rotation skipped, window closed");
            return Ok(None);
        }

        let period = self.timing.rotation_period;
        // Due rotations keep the original cadence unless a whole period
        // was missed; early rotations start a fresh period.
        let next_due = match inner.rotate_at {
            Some(due) if now >= due => {
                let anchored = add(due, period);
                if anchored > now { anchored } else { add(now, period) }
            }
            _ => add(now, period),
        };

        let issued = self.issue_locked(inner, now, next_due);
        debug!(
            session_id = %self.id,
            epoch = issued.epoch,
            expires_at = %issued.expires_at,
            "token rotated"
        );
        Ok(Some(issued))
    }

    fn end_locked(
        &self,
        inner: &mut SessionInner,
        now: DateTime<Utc>,
    ) -> Result<AggregateCounts, SessionError> {
        if inner.state == LifecycleState::Ended {
            return Err(self.invalid(inner.state, LifecycleAction::End));
        }

        let from = inner.state;
        inner.state = LifecycleState::Ended;
        if let Some(token) = inner.current.take() {
            inner.retire(token);
        }
        inner.rotate_at = None;
        inner.ended_at = Some(now);

        let counts = self.recount(inner).map_err(|detail| self.violation(detail))?;

        info!(
            session_id = %self.id,
            %from,
            present = counts.present,
            late = counts.late,
            absent = counts.absent,
            "session ended"
        );
        Ok(counts)
    }

    /// Issues the next epoch's token, retiring the current one.
    fn issue_locked(
        &self,
        inner: &mut SessionInner,
        now: DateTime<Utc>,
        rotate_at: DateTime<Utc>,
    ) -> TokenDisplay {
        inner.epoch += 1;
        let expires_at = self.expiry_for(rotate_at, inner.window_end);
        let token = self.tokens.issue(self.id, inner.epoch, now, expires_at);
        let display = token.display();

        if let Some(old) = inner.current.replace(token) {
            inner.retire(old);
        }
        inner.rotate_at = Some(rotate_at);
        display
    }

    /// Expiry of a token due for rotation at `rotate_at`: never past the
    /// window end.
    fn expiry_for(&self, rotate_at: DateTime<Utc>, window_end: DateTime<Utc>) -> DateTime<Utc> {
        add(rotate_at, self.timing.drift_allowance).min(window_end)
    }

    /// The cheap per-mutation check: running counts add up and cover the
    /// whole roster.
    fn check_invariant(&self, inner: &mut SessionInner) -> Result<(), String> {
        let counts = inner.counts;
        if counts.total == self.roster_target_count
            && counts.is_consistent()
            && inner.records.len() == self.roster_target_count
        {
            return Ok(());
        }
        self.halt(
            inner,
            format!(
                "status counts sum to {} with total {}, roster has {} and {} records exist",
                counts.sum(),
                counts.total,
                self.roster_target_count,
                inner.records.len()
            ),
        )
    }

    /// The full check: running counts equal a fresh tally of the records.
    fn recount(&self, inner: &mut SessionInner) -> Result<AggregateCounts, String> {
        self.check_invariant(inner)?;
        let tally = AggregateCounts::tally(inner.records.values().map(|r| r.status));
        if tally != inner.counts {
            let detail = format!(
                "running counts {:?} disagree with records {:?}",
                inner.counts, tally
            );
            self.halt(inner, detail)?;
        }
        Ok(tally)
    }

    fn halt(&self, inner: &mut SessionInner, detail: String) -> Result<(), String> {
        error!(
            session_id = %self.id,
            %detail,
            "attendance invariant violated, halting session"
        );
        inner.halted = Some(detail.clone());
        Err(detail)
    }

    fn invalid(&self, state: LifecycleState, action: LifecycleAction) -> SessionError {
        SessionError::InvalidTransition {
            session_id: self.id,
            state,
            action,
        }
    }

    fn violation(&self, detail: String) -> SessionError {
        SessionError::InvariantViolation {
            session_id: self.id,
            detail,
        }
    }
}

impl std::fmt::Debug for AttendanceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttendanceSession")
            .field("id", &self.id)
            .field("roster_target_count", &self.roster_target_count)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

/// `at + delta`, saturating at the end of representable time.
fn add(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use rollcall_token::HmacTokenGenerator;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 5, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    fn session(roster_size: u64) -> AttendanceSession {
        let roster: Roster = (1..=roster_size).map(ParticipantId).collect();
        let schedule = SessionSchedule::new(t0(), t0() + TimeDelta::minutes(10))
            .rotation_period(Duration::from_secs(30))
            .grace_period(Duration::from_secs(60))
            .drift_allowance(Duration::from_secs(1));
        AttendanceSession::new(
            SessionId(1),
            &roster,
            &schedule,
            Arc::new(HmacTokenGenerator::with_random_secret()),
        )
        .unwrap()
    }

    // -- Creation --

    #[test]
    fn test_new_starts_scheduled_with_everyone_absent() {
        let s = session(3);
        assert_eq!(s.state(), LifecycleState::Scheduled);
        assert_eq!(s.aggregate_counts().unwrap(), AggregateCounts::all_absent(3));
        assert_eq!(s.records().len(), 3);
        assert_eq!(s.snapshot().epoch, 0);
    }

    #[test]
    fn test_new_duplicate_participant_returns_invalid_plan() {
        let roster = Roster::new([ParticipantId(1), ParticipantId(2), ParticipantId(1)]);
        let schedule = SessionSchedule::new(t0(), t0() + secs(60));
        let result = AttendanceSession::new(
            SessionId(1),
            &roster,
            &schedule,
            Arc::new(HmacTokenGenerator::with_random_secret()),
        );
        assert!(matches!(result, Err(SessionError::InvalidPlan(_))));
    }

    #[test]
    fn test_new_empty_roster_is_allowed() {
        let s = session(0);
        assert_eq!(s.aggregate_counts().unwrap(), AggregateCounts::default());
    }

    // -- Activation --

    #[test]
    fn test_activate_issues_epoch_one_token() {
        let s = session(1);
        let display = s.activate(t0()).unwrap();
        assert_eq!(display.epoch, 1);
        assert_eq!(display.expires_at, t0() + secs(31));
        assert_eq!(s.state(), LifecycleState::Active);
    }

    #[test]
    fn test_activate_before_window_returns_window_not_open() {
        let s = session(1);
        let result = s.activate(t0() - secs(1));
        assert!(matches!(result, Err(SessionError::WindowNotOpen { .. })));
        assert_eq!(s.state(), LifecycleState::Scheduled);
    }

    #[test]
    fn test_activate_twice_returns_invalid_transition() {
        let s = session(1);
        s.activate(t0()).unwrap();
        let result = s.activate(t0());
        assert!(matches!(
            result,
            Err(SessionError::InvalidTransition {
                state: LifecycleState::Active,
                action: LifecycleAction::Activate,
                ..
            })
        ));
    }

    // -- Rotation --

    #[test]
    fn test_rotate_before_activation_returns_invalid_transition() {
        let s = session(1);
        assert!(matches!(
            s.rotate(t0()),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_rotate_increments_epoch_and_changes_value() {
        let s = session(1);
        let first = s.activate(t0()).unwrap();
        let second = s.rotate(t0() + secs(30)).unwrap().unwrap();
        assert_eq!(second.epoch, 2);
        assert_ne!(first.value, second.value);
    }

    #[test]
    fn test_rotate_when_due_keeps_cadence_anchored() {
        let s = session(1);
        s.activate(t0()).unwrap();
        // Due at +30s, the sweep runs 800ms late.
        let display = s.rotate(t0() + TimeDelta::milliseconds(30_800)).unwrap().unwrap();
        // Next due at +60s, plus 1s drift.
        assert_eq!(display.expires_at, t0() + secs(61));
    }

    #[test]
    fn test_rotate_after_missing_a_whole_period_restarts_cadence() {
        let s = session(1);
        s.activate(t0()).unwrap();
        let display = s.rotate(t0() + secs(75)).unwrap().unwrap();
        assert_eq!(display.expires_at, t0() + secs(106));
    }

    #[test]
    fn test_rotate_early_starts_a_fresh_period() {
        let s = session(1);
        s.activate(t0()).unwrap();
        let display = s.rotate(t0() + secs(10)).unwrap().unwrap();
        assert_eq!(display.expires_at, t0() + secs(41));
    }

    #[test]
    fn test_rotate_at_window_end_is_a_noop() {
        let s = session(1);
        s.activate(t0()).unwrap();
        let result = s.rotate(t0() + TimeDelta::minutes(10)).unwrap();
        assert_eq!(result, None);
        assert_eq!(s.snapshot().epoch, 1);
    }

    #[test]
    fn test_retired_tokens_are_capped_to_recent_epochs() {
        let s = session(1);
        let first = s.activate(t0()).unwrap();
        let mut previous = first.clone();
        let rotations = RETIRED_TOKEN_LIMIT + 40;
        for i in 1..=rotations {
            let at = t0() + TimeDelta::milliseconds(i as i64 * 100);
            let current = s.rotate(at).unwrap().unwrap();
            if i < rotations {
                previous = current;
            }
        }
        assert_eq!(s.snapshot().epoch, rotations + 1);
        assert_eq!(s.inner.lock().retired.len() as u64, RETIRED_TOKEN_LIMIT);

        let now = t0() + secs(31);
        assert!(matches!(
            s.record_scan(ParticipantId(1), &first.value, now),
            Err(ScanError::TokenMismatch(_))
        ));
        assert!(matches!(
            s.record_scan(ParticipantId(1), &previous.value, now),
            Err(ScanError::TokenExpired { .. })
        ));
    }

    #[test]
    fn test_token_expiry_is_clamped_to_window_end() {
        let s = session(1);
        s.activate(t0()).unwrap();
        let display = s.rotate(t0() + secs(590)).unwrap().unwrap();
        assert_eq!(display.expires_at, t0() + TimeDelta::minutes(10));
    }

    // -- End --

    #[test]
    fn test_end_from_scheduled_cancels() {
        let s = session(2);
        let counts = s.end(t0() - secs(10)).unwrap();
        assert_eq!(counts, AggregateCounts::all_absent(2));
        assert_eq!(s.state(), LifecycleState::Ended);
        assert_eq!(s.ended_at(), Some(t0() - secs(10)));
    }

    #[test]
    fn test_end_twice_returns_invalid_transition() {
        let s = session(1);
        s.end(t0()).unwrap();
        assert!(matches!(
            s.end(t0()),
            Err(SessionError::InvalidTransition {
                action: LifecycleAction::End,
                ..
            })
        ));
    }

    #[test]
    fn test_end_withdraws_token() {
        let s = session(1);
        s.activate(t0()).unwrap();
        s.end(t0() + secs(5)).unwrap();
        assert_eq!(
            s.current_token_display(),
            Err(SessionError::NoActiveToken(SessionId(1)))
        );
    }

    // -- advance --

    #[test]
    fn test_advance_before_window_does_nothing() {
        let s = session(1);
        assert!(s.advance(t0() - secs(1)).unwrap().is_empty());
    }

    #[test]
    fn test_advance_activates_then_rotates_then_ends() {
        let s = session(1);

        let t = s.advance(t0()).unwrap();
        assert!(matches!(t.as_slice(), [Transition::Activated(d)] if d.epoch == 1));

        assert!(s.advance(t0() + secs(29)).unwrap().is_empty());

        let t = s.advance(t0() + secs(30)).unwrap();
        assert!(matches!(t.as_slice(), [Transition::Rotated(d)] if d.epoch == 2));

        let t = s.advance(t0() + TimeDelta::minutes(10)).unwrap();
        assert!(matches!(t.as_slice(), [Transition::Ended(_)]));
        assert_eq!(s.state(), LifecycleState::Ended);

        assert!(s.advance(t0() + TimeDelta::minutes(11)).unwrap().is_empty());
    }

    #[test]
    fn test_advance_past_whole_window_activates_and_ends() {
        let s = session(1);
        let t = s.advance(t0() + TimeDelta::hours(1)).unwrap();
        assert!(matches!(
            t.as_slice(),
            [Transition::Activated(_), Transition::Ended(_)]
        ));
    }

    // -- Window extension --

    #[test]
    fn test_extend_window_moves_end_and_reclamps_token() {
        let s = session(1);
        s.activate(t0()).unwrap();
        let clamped = s.rotate(t0() + secs(590)).unwrap().unwrap();
        assert_eq!(clamped.expires_at, t0() + TimeDelta::minutes(10));

        let previous = s.extend_window(t0() + TimeDelta::minutes(20)).unwrap();

        assert_eq!(previous, t0() + TimeDelta::minutes(10));
        assert_eq!(s.window_end(), t0() + TimeDelta::minutes(20));
        assert_eq!(
            s.current_token_display().unwrap().expires_at,
            t0() + secs(621)
        );
    }

    #[test]
    fn test_extend_window_not_later_returns_invalid_plan() {
        let s = session(1);
        s.activate(t0()).unwrap();
        assert!(matches!(
            s.extend_window(t0() + TimeDelta::minutes(10)),
            Err(SessionError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_extend_window_when_scheduled_returns_invalid_transition() {
        let s = session(1);
        assert!(matches!(
            s.extend_window(t0() + TimeDelta::minutes(30)),
            Err(SessionError::InvalidTransition {
                action: LifecycleAction::ExtendWindow,
                ..
            })
        ));
    }

    // -- Overrides --

    #[test]
    fn test_override_status_moves_counts() {
        let s = session(2);
        let change = s
            .override_status(ParticipantId(2), AttendanceStatus::Excused, "registrar")
            .unwrap();
        assert_eq!(change.from, AttendanceStatus::Absent);
        assert_eq!(change.counts.excused, 1);
        assert_eq!(change.counts.absent, 1);
        assert_eq!(
            s.record(ParticipantId(2)).unwrap().overridden_by.as_deref(),
            Some("registrar")
        );
    }

    #[test]
    fn test_override_status_unknown_participant_returns_error() {
        let s = session(1);
        assert!(matches!(
            s.override_status(ParticipantId(42), AttendanceStatus::Sick, "admin"),
            Err(SessionError::UnknownParticipant { .. })
        ));
    }

    #[test]
    fn test_override_status_after_end_succeeds() {
        let s = session(1);
        s.end(t0()).unwrap();
        let change = s
            .override_status(ParticipantId(1), AttendanceStatus::Sick, "admin")
            .unwrap();
        assert_eq!(change.counts.sick, 1);
    }

    // -- Invariant violation --

    #[test]
    fn test_corrupted_counts_halt_the_session() {
        let s = session(2);
        s.activate(t0()).unwrap();
        s.inner.lock().counts.present += 1;

        let err = s
            .override_status(ParticipantId(1), AttendanceStatus::Sick, "admin")
            .unwrap_err();
        assert!(matches!(err, SessionError::InvariantViolation { .. }));
        assert!(s.is_halted());

        // Every later operation refuses.
        assert!(matches!(
            s.aggregate_counts(),
            Err(SessionError::InvariantViolation { .. })
        ));
        assert!(matches!(
            s.rotate(t0() + secs(30)),
            Err(SessionError::InvariantViolation { .. })
        ));
        let token = "anything";
        assert!(matches!(
            s.record_scan(ParticipantId(2), token, t0()),
            Err(ScanError::InvariantViolation { .. })
        ));
        assert!(s.snapshot().halted);
    }

    #[test]
    fn test_verify_counts_catches_record_drift() {
        let s = session(2);
        // Counts stay internally consistent but no longer match records.
        {
            let mut inner = s.inner.lock();
            inner.counts.absent -= 1;
            inner.counts.present += 1;
        }
        assert!(matches!(
            s.verify_counts(),
            Err(SessionError::InvariantViolation { .. })
        ));
        assert!(s.is_halted());
    }

    #[test]
    fn test_verify_counts_on_healthy_session_returns_counts() {
        let s = session(4);
        assert_eq!(s.verify_counts().unwrap(), AggregateCounts::all_absent(4));
    }
}
