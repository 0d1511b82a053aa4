//! Wire protocol and shared value types for Rollcall.
//!
//! This crate defines the vocabulary every other layer speaks:
//!
//! - **Types** ([`SessionId`], [`ParticipantId`], [`AttendanceStatus`],
//!   [`AggregateCounts`], [`TokenDisplay`], [`SessionEvent`]): the values
//!   that flow between the attendance core and its callers.
//! - **Messages** ([`Envelope`], [`Message`]): the structures that travel
//!   on the wire between the server and scanning clients or dashboards.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become
//!   bytes and back.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (attendance core)
//! ```

mod codec;
mod error;
mod message;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{Envelope, ErrorKind, Message};
pub use types::{
    AggregateCounts, AttendanceStatus, ParticipantId, SessionEvent,
    SessionId, TokenDisplay,
};
