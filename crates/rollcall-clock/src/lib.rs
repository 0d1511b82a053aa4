//! Time for Rollcall: where "now" comes from, and when to look at it.
//!
//! - [`Clock`] is the only source of the current instant the attendance
//!   core consults. [`SystemClock`] reads the wall clock;
//!   [`ManualClock`] is moved by hand in tests and simulations.
//! - [`SweepScheduler`] fires at a fixed interval so one recurring task
//!   can check every live session for due activations, rotations, and
//!   expiries, instead of keeping one timer per session.
//!
//! # Integration
//!
//! The scheduler sits inside a sweep task's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         tick = scheduler.wait_for_sweep() => {
//!             registry.sweep(clock.now());
//!             scheduler.record_sweep_end();
//!         }
//!     }
//! }
//! ```

mod clock;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduler::{SweepConfig, SweepMetrics, SweepPolicy, SweepScheduler, SweepTick};
