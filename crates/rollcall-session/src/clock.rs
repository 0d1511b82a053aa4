//! The sweep that keeps every session on schedule.
//!
//! One recurring task visits every live session each interval and asks it
//! to [`advance`](crate::AttendanceSession::advance): activate when its
//! window opens, rotate when its token is due, end when its window closes.
//! Session count grows the work per sweep, not the number of timers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rollcall_clock::{Clock, SweepConfig, SweepMetrics, SweepScheduler};
use rollcall_protocol::{SessionEvent, SessionId};
use tokio::sync::watch;
use tracing::{info, trace, warn};

use crate::{SessionError, SessionRegistry, Transition};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub activated: Vec<SessionId>,
    pub rotated: Vec<SessionId>,
    pub ended: Vec<SessionId>,
    pub evicted: Vec<SessionId>,
    /// Sessions that refused to advance because they are halted.
    pub halted: Vec<SessionId>,
}

impl SweepReport {
    /// Returns `true` if the sweep changed nothing.
    pub fn is_idle(&self) -> bool {
        self.activated.is_empty()
            && self.rotated.is_empty()
            && self.ended.is_empty()
            && self.evicted.is_empty()
    }
}

/// Drives session lifecycles from a single recurring sweep.
///
/// Set each session's drift allowance to at least the sweep interval;
/// rotation can then fire up to one interval late without leaving a gap
/// in which no token is valid.
pub struct SessionClock {
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    scheduler: SweepScheduler,
    /// When set, ended sessions are evicted once this has passed.
    retention: Option<Duration>,
}

impl SessionClock {
    pub fn new(registry: Arc<SessionRegistry>, clock: Arc<dyn Clock>, config: SweepConfig) -> Self {
        Self {
            registry,
            clock,
            scheduler: SweepScheduler::new(config),
            retention: None,
        }
    }

    /// Also evict ended sessions older than `retention` on every sweep.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// The configured sweep interval.
    pub fn interval(&self) -> Duration {
        self.scheduler.interval()
    }

    /// Sweep counts and timings so far.
    pub fn metrics(&self) -> &SweepMetrics {
        self.scheduler.metrics()
    }

    /// Runs one sweep at `now`. Synchronous and idempotent: sweeping the
    /// same instant twice changes nothing the second time.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.registry.live_sessions() {
            let session_id = session.id();
            let transitions = match session.advance(now) {
                Ok(transitions) => transitions,
                Err(SessionError::InvariantViolation { .. }) => {
                    report.halted.push(session_id);
                    continue;
                }
                Err(err) => {
                    warn!(%session_id, error = %err, "session failed to advance");
                    continue;
                }
            };

            // The session lock is released; publish what happened.
            for transition in transitions {
                match transition {
                    Transition::Activated(token) => {
                        report.activated.push(session_id);
                        self.registry.publish(SessionEvent::Activated {
                            session_id,
                            epoch: token.epoch,
                            expires_at: token.expires_at,
                        });
                    }
                    Transition::Rotated(token) => {
                        report.rotated.push(session_id);
                        self.registry.publish(SessionEvent::TokenRotated {
                            session_id,
                            epoch: token.epoch,
                            expires_at: token.expires_at,
                        });
                    }
                    Transition::Ended(counts) => {
                        report.ended.push(session_id);
                        self.registry
                            .publish(SessionEvent::Ended { session_id, counts });
                    }
                }
            }
        }

        if let Some(retention) = self.retention {
            report.evicted = self.registry.evict_expired(retention, now);
        }

        report
    }

    /// Sweeps every interval until `shutdown` flips to `true` (or its
    /// sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.scheduler.interval().as_millis() as u64,
            "session clock started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                tick = self.scheduler.wait_for_sweep() => {
                    let report = self.sweep(self.clock.now());
                    self.scheduler.record_sweep_end();
                    let metrics = self.scheduler.metrics();
                    trace!(
                        sweep = tick.sweep,
                        late_ms = tick.late_by.as_millis() as u64,
                        activated = report.activated.len(),
                        rotated = report.rotated.len(),
                        ended = report.ended.len(),
                        evicted = report.evicted.len(),
                        budget_utilization = metrics.budget_utilization,
                        "sweep done"
                    );
                }
            }
        }

        let metrics = self.scheduler.metrics();
        info!(
            sweeps = metrics.total_sweeps,
            overruns = metrics.total_overruns,
            skipped = metrics.total_skipped,
            avg_sweep_us = metrics.avg_sweep_time.as_micros() as u64,
            max_sweep_us = metrics.max_sweep_time.as_micros() as u64,
            "session clock stopped"
        );
    }
}

impl std::fmt::Debug for SessionClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClock")
            .field("interval", &self.scheduler.interval())
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}
