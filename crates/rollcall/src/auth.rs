//! Handshake authentication and the roles it grants.
//!
//! Rollcall does not issue credentials. The server calls an
//! [`Authenticator`] with the token from the client's handshake and gets
//! back a [`Principal`]: a name for the audit log and a [`Role`] that
//! decides which requests the connection may make.
//!
//! | Role          | May do                                              |
//! |---------------|-----------------------------------------------------|
//! | `Admin`       | everything, including scanning on someone's behalf  |
//! | `Viewer`      | read counts and the current token, subscribe        |
//! | `Participant` | scan for itself, read counts, subscribe             |

use std::collections::HashMap;
use std::fmt;

use rollcall_protocol::ParticipantId;

/// What an authenticated connection is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Viewer,
    Participant(ParticipantId),
}

impl Role {
    /// Open, close, extend and override.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Participants never see the token value; they have to read it off
    /// the display in the room.
    pub fn can_view_token(&self) -> bool {
        matches!(self, Self::Admin | Self::Viewer)
    }

    /// Returns `true` if this role may submit a scan for `participant_id`.
    pub fn can_scan_for(&self, participant_id: ParticipantId) -> bool {
        match self {
            Self::Admin => true,
            Self::Participant(own) => *own == participant_id,
            Self::Viewer => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => f.write_str("admin"),
            Self::Viewer => f.write_str("viewer"),
            Self::Participant(id) => write!(f, "participant {id}"),
        }
    }
}

/// The identity behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Recorded as the actor on every audit entry this connection causes.
    pub actor: String,
    pub role: Role,
}

impl Principal {
    pub fn new(actor: impl Into<String>, role: Role) -> Self {
        Self {
            actor: actor.into(),
            role,
        }
    }
}

/// Why a handshake token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("handshake carried no token")]
    MissingToken,

    #[error("token not recognised")]
    UnknownToken,
}

/// Validates a handshake token and returns who is connecting.
///
/// # Trait bounds
///
/// - `Send + Sync` → one authenticator is shared by every connection task.
/// - `'static` → it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use rollcall::{AuthError, Authenticator, Principal, Role};
///
/// /// Everyone is a viewer.
/// struct OpenDoor;
///
/// impl Authenticator for OpenDoor {
///     async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
///         Ok(Principal::new(token, Role::Viewer))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Called once per connection, during the handshake.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Principal, AuthError>> + Send;
}

/// Fixed token → principal table, loaded from the configuration file.
#[derive(Clone, Default)]
pub struct StaticAuthenticator {
    principals: HashMap<String, Principal>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the principal for `token`.
    pub fn insert(&mut self, token: impl Into<String>, principal: Principal) {
        self.principals.insert(token.into(), principal);
    }

    pub fn with_principal(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.insert(token, principal);
        self
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.principals
            .get(token)
            .cloned()
            .ok_or(AuthError::UnknownToken)
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for StaticAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAuthenticator")
            .field("principals", &self.principals.len())
            .finish()
    }
}
