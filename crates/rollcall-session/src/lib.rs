//! The attendance core of Rollcall.
//!
//! An administrator opens a time-boxed session for a roster; a token
//! rotates on a fixed cadence; each participant presents the current
//! token once and is recorded as `Present` or `Late`; everyone else stays
//! `Absent` unless an audited override says otherwise. Counts always add
//! up to the roster size, even while scans and rotations race.
//!
//! # Key types
//!
//! - [`AttendanceSession`]: the aggregate root; one lock per session
//! - [`ScanProcessor`]: validates and records scans
//! - [`SessionRegistry`]: all live sessions, routing, eviction, events
//! - [`SessionClock`]: the recurring sweep that activates, rotates,
//!   and ends sessions on time
//! - [`LifecycleState`]: `Scheduled → Active → Ended`
//! - [`RosterProvider`], [`AuditSink`]: external collaborators
//!
//! ```text
//! SessionClock ──sweep──┐
//!                       ▼
//! ScanProcessor ──► SessionRegistry ──► AttendanceSession ──► TokenGenerator
//! ```

mod clock;
mod collaborator;
mod error;
mod lifecycle;
mod processor;
mod record;
mod registry;
mod schedule;
mod session;

pub use clock::{SessionClock, SweepReport};
pub use collaborator::{
    AuditAction, AuditEntry, AuditSink, Roster, RosterProvider, StaticRoster, TracingAuditSink,
};
pub use error::{ScanError, SessionError};
pub use lifecycle::{LifecycleAction, LifecycleState};
pub use processor::{ScanProcessor, ScanReceipt};
pub use record::AttendanceRecord;
pub use registry::SessionRegistry;
pub use schedule::SessionSchedule;
pub use session::{
    AttendanceSession, RETIRED_TOKEN_LIMIT, SessionSnapshot, StatusChange, Transition,
};
