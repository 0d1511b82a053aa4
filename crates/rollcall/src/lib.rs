//! # Rollcall
//!
//! Live attendance sessions with rotating QR scan tokens.
//!
//! An administrator opens a session for a class roster. While its window
//! is open, a display in the room shows a token that rotates every few
//! seconds; participants scan it with their phones and the server records
//! them `Present` (or `Late` after the grace period). Counts update live
//! for every subscribed screen.
//!
//! This meta-crate wires the layers into a WebSocket server:
//!
//! ```text
//! rollcall-transport → rollcall-protocol → rollcall-session
//!                                              ├─ rollcall-token
//!                                              └─ rollcall-clock
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rollcall::prelude::*;
//!
//! # async fn start() -> Result<(), RollcallError> {
//! let config = RollcallConfig::from_toml_str(r#"
//!     [[principals]]
//!     token = "registrar-token"
//!     actor = "registrar"
//!     role = "admin"
//!
//!     [classes]
//!     cs101 = [1, 2, 3]
//! "#)?;
//!
//! let server = RollcallServerBuilder::new()
//!     .config(config.server_config())
//!     .build(config.authenticator()?, config.rosters())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthError, Authenticator, Principal, Role, StaticAuthenticator};
pub use config::{
    ConfigError, PrincipalEntry, RoleName, RollcallConfig, ServerSection, SessionsSection,
    SweepPolicyName, SweepSection,
};
pub use error::RollcallError;
pub use server::{PROTOCOL_VERSION, RollcallServer, RollcallServerBuilder, ServerConfig};

/// Everything needed to run a server or talk to one in-process.
pub mod prelude {
    pub use rollcall_clock::{Clock, ManualClock, SweepConfig, SystemClock};
    pub use rollcall_protocol::{
        AggregateCounts, AttendanceStatus, Codec, Envelope, ErrorKind, JsonCodec, Message,
        ParticipantId, SessionEvent, SessionId, TokenDisplay,
    };
    pub use rollcall_session::{
        AuditSink, Roster, RosterProvider, ScanError, ScanProcessor, SessionError,
        SessionRegistry, SessionSchedule, StaticRoster,
    };
    pub use rollcall_token::{HmacTokenGenerator, TokenGenerator, TokenSecret};

    pub use crate::{
        Authenticator, AuthError, PROTOCOL_VERSION, Principal, Role, RollcallConfig,
        RollcallError, RollcallServer, RollcallServerBuilder, ServerConfig, StaticAuthenticator,
    };
}
