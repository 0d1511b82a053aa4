//! Unified error type for Rollcall.

use rollcall_protocol::ProtocolError;
use rollcall_session::{ScanError, SessionError};
use rollcall_token::TokenError;
use rollcall_transport::TransportError;

use crate::auth::AuthError;
use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `rollcall` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate. The
/// `#[from]` attribute on each variant generates the `From` impl, so the
/// `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A token key could not be loaded.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A session-level error (lifecycle, plan, roster, invariant).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A scan was refused.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The handshake token was refused.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The configuration file is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
