//! Per-participant attendance record.

use chrono::{DateTime, Utc};
use rollcall_protocol::{AttendanceStatus, ParticipantId};
use serde::{Deserialize, Serialize};

/// One roster member's attendance in one session.
///
/// Every roster member gets a record at creation, starting `Absent`, so
/// the counts add up to the roster size before anyone has scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub participant_id: ParticipantId,
    pub status: AttendanceStatus,
    /// When the accepted scan happened. `None` until then.
    pub scan_time: Option<DateTime<Utc>>,
    /// Which token generation accepted the scan.
    pub token_epoch: Option<u64>,
    /// Who last changed the status by hand, if anyone.
    pub overridden_by: Option<String>,
}

impl AttendanceRecord {
    /// A fresh record for a roster member who has not scanned.
    pub fn absent(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            status: AttendanceStatus::Absent,
            scan_time: None,
            token_epoch: None,
            overridden_by: None,
        }
    }

    /// Returns `true` once a scan has been accepted for this participant.
    /// Overrides never clear this.
    pub fn has_scanned(&self) -> bool {
        self.scan_time.is_some()
    }
}
