//! Scan validation and the scan entry point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_clock::Clock;
use rollcall_protocol::{
    AggregateCounts, AttendanceStatus, ParticipantId, SessionEvent, SessionId,
};
use tracing::debug;

use crate::schedule::SessionTiming;
use crate::session::SessionInner;
use crate::{LifecycleState, ScanError, SessionRegistry};

/// What an accepted scan recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReceipt {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub status: AttendanceStatus,
    /// Epoch of the token that was presented.
    pub epoch: u64,
    pub scan_time: DateTime<Utc>,
    /// Counts right after this scan.
    pub counts: AggregateCounts,
}

/// Checks one scan against the locked session state and records it.
///
/// Checks run in a fixed order and the first failure wins: lifecycle,
/// roster membership, token freshness, token value, and finally whether
/// the participant already scanned.
pub(crate) fn apply_scan(
    session_id: SessionId,
    timing: &SessionTiming,
    inner: &mut SessionInner,
    participant_id: ParticipantId,
    presented: &str,
    now: DateTime<Utc>,
) -> Result<ScanReceipt, ScanError> {
    let token = match (&inner.state, &inner.current) {
        (LifecycleState::Active, Some(token)) => token,
        (state, _) => {
            return Err(ScanError::SessionNotActive {
                session_id,
                state: *state,
            });
        }
    };

    let Some(record) = inner.records.get_mut(&participant_id) else {
        return Err(ScanError::UnknownParticipant {
            session_id,
            participant_id,
        });
    };

    let expired = ScanError::TokenExpired {
        session_id,
        current_epoch: token.epoch,
    };
    if !token.is_live_at(now) {
        return Err(expired);
    }
    if !token.matches(presented) {
        // A value we issued earlier is a replay after rotation.
        return Err(if inner.retired.contains_key(presented.trim()) {
            expired
        } else {
            ScanError::TokenMismatch(session_id)
        });
    }

    if record.has_scanned() {
        return Err(ScanError::AlreadyRecorded {
            session_id,
            participant_id,
            status: record.status,
        });
    }

    let status = if now <= timing.present_deadline {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Late
    };
    let from = record.status;
    record.status = status;
    record.scan_time = Some(now);
    record.token_epoch = Some(token.epoch);
    inner.counts.shift(from, status);

    Ok(ScanReceipt {
        session_id,
        participant_id,
        status,
        epoch: token.epoch,
        scan_time: now,
        counts: inner.counts,
    })
}

// ---------------------------------------------------------------------------
// ScanProcessor
// ---------------------------------------------------------------------------

/// Routes scans to their session and publishes the outcome.
///
/// The processor holds no state of its own; clone the `Arc`s freely and
/// call it from as many tasks as needed. Scans for different sessions
/// never contend; scans for the same session queue on that session's
/// lock in arrival order.
#[derive(Clone)]
pub struct ScanProcessor {
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
}

impl ScanProcessor {
    pub fn new(registry: Arc<SessionRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// Validates and records a scan evaluated at `now`.
    pub fn process_scan(
        &self,
        session_id: SessionId,
        presented: &str,
        participant_id: ParticipantId,
        now: DateTime<Utc>,
    ) -> Result<ScanReceipt, ScanError> {
        let session = self
            .registry
            .get(session_id)
            .ok_or(ScanError::SessionNotFound(session_id))?;

        match session.record_scan(participant_id, presented, now) {
            Ok(receipt) => {
                debug!(
                    %session_id,
                    %participant_id,
                    status = %receipt.status,
                    epoch = receipt.epoch,
                    "scan accepted"
                );
                self.registry.publish(SessionEvent::ParticipantScanned {
                    session_id,
                    participant_id,
                    status: receipt.status,
                    counts: receipt.counts,
                });
                Ok(receipt)
            }
            Err(err) => {
                debug!(%session_id, %participant_id, reason = %err, "scan rejected");
                Err(err)
            }
        }
    }

    /// Validates and records a scan at the current time.
    pub fn submit_scan(
        &self,
        session_id: SessionId,
        presented: &str,
        participant_id: ParticipantId,
    ) -> Result<ScanReceipt, ScanError> {
        self.process_scan(session_id, presented, participant_id, self.clock.now())
    }
}

impl std::fmt::Debug for ScanProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanProcessor")
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}
