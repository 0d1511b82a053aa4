//! Session schedule and its validated timing.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionSchedule
// ---------------------------------------------------------------------------

/// When a session runs and how its token behaves.
///
/// Built with [`SessionSchedule::new`] and the chained setters; the
/// remaining fields default to a 30 s rotation, a 5 min grace period, and
/// a 1 s drift allowance.
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeDelta, Utc};
/// use rollcall_session::SessionSchedule;
///
/// let start = Utc::now();
/// let schedule = SessionSchedule::new(start, start + TimeDelta::minutes(50))
///     .rotation_period(Duration::from_secs(15))
///     .grace_period(Duration::from_secs(120));
/// assert_eq!(schedule.rotation_period, Duration::from_secs(15));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSchedule {
    /// The session activates at this instant.
    pub window_start: DateTime<Utc>,

    /// The session ends at this instant (extendable while `Active`).
    pub window_end: DateTime<Utc>,

    /// Time between token rotations.
    pub rotation_period: Duration,

    /// Scans up to and including `window_start + grace_period` count as
    /// `Present`; later ones as `Late`.
    pub grace_period: Duration,

    /// Extra lifetime added to every token so a late sweep never leaves a
    /// gap without a valid token. Should be at least one sweep interval.
    pub drift_allowance: Duration,
}

impl SessionSchedule {
    pub const DEFAULT_ROTATION: Duration = Duration::from_secs(30);
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(300);
    pub const DEFAULT_DRIFT: Duration = Duration::from_secs(1);

    /// A schedule for the given window with default timing.
    pub fn new(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            window_start,
            window_end,
            rotation_period: Self::DEFAULT_ROTATION,
            grace_period: Self::DEFAULT_GRACE,
            drift_allowance: Self::DEFAULT_DRIFT,
        }
    }

    pub fn rotation_period(mut self, period: Duration) -> Self {
        self.rotation_period = period;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn drift_allowance(mut self, drift: Duration) -> Self {
        self.drift_allowance = drift;
        self
    }

    /// Checks the schedule and converts its durations once.
    pub(crate) fn validate(&self) -> Result<SessionTiming, SessionError> {
        if self.window_end <= self.window_start {
            return Err(SessionError::InvalidPlan(format!(
                "window end {} is not after window start {}",
                self.window_end, self.window_start
            )));
        }
        if self.rotation_period.is_zero() {
            return Err(SessionError::InvalidPlan(
                "rotation period must be positive".into(),
            ));
        }

        let rotation_period = to_delta("rotation period", self.rotation_period)?;
        let grace_period = to_delta("grace period", self.grace_period)?;
        let drift_allowance = to_delta("drift allowance", self.drift_allowance)?;

        let present_deadline = self
            .window_start
            .checked_add_signed(grace_period)
            .ok_or_else(|| SessionError::InvalidPlan("grace period out of range".into()))?;

        Ok(SessionTiming {
            window_start: self.window_start,
            present_deadline,
            rotation_period,
            drift_allowance,
        })
    }
}

fn to_delta(what: &str, duration: Duration) -> Result<TimeDelta, SessionError> {
    TimeDelta::from_std(duration)
        .map_err(|_| SessionError::InvalidPlan(format!("{what} out of range")))
}

// ---------------------------------------------------------------------------
// SessionTiming
// ---------------------------------------------------------------------------

/// The immutable, validated timing of one session. `window_end` is not
/// here because it may be extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionTiming {
    pub(crate) window_start: DateTime<Utc>,
    /// `window_start + grace_period`, inclusive.
    pub(crate) present_deadline: DateTime<Utc>,
    pub(crate) rotation_period: TimeDelta,
    pub(crate) drift_allowance: TimeDelta,
}
