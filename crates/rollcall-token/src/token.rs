//! Token and key types.

use std::fmt;

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use rand::Rng;
use rollcall_protocol::{SessionId, TokenDisplay};

use crate::TokenError;

// ---------------------------------------------------------------------------
// TokenSecret
// ---------------------------------------------------------------------------

/// 256-bit HMAC key for token generation.
///
/// `Debug` is redacted so the key never ends up in logs.
#[derive(Clone)]
pub struct TokenSecret([u8; TokenSecret::LEN]);

impl TokenSecret {
    /// Key length in bytes.
    pub const LEN: usize = 32;

    /// Draws a fresh random key. Tokens issued under a previous key stop
    /// matching, which is fine: they live for seconds.
    pub fn generate() -> Self {
        Self(rand::rng().random())
    }

    /// Parses a key from 64 hex characters (as stored in configuration).
    pub fn from_hex(hex_str: &str) -> Result<Self, TokenError> {
        let bytes = hex::decode(hex_str.trim())?;
        let key: [u8; Self::LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| TokenError::InvalidLength {
                    expected: Self::LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(key))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(..)")
    }
}

// ---------------------------------------------------------------------------
// ScanToken
// ---------------------------------------------------------------------------

/// One issued token: the value scanners present, plus the bounds the
/// session checks it against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanToken {
    /// Opaque lowercase-hex value.
    pub value: String,
    pub session_id: SessionId,
    /// Rotation generation, starting at 1.
    pub epoch: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ScanToken {
    /// Compares `presented` with this token's value in constant time.
    pub fn matches(&self, presented: &str) -> bool {
        constant_time_eq(self.value.as_bytes(), presented.trim().as_bytes())
    }

    /// Returns `true` if `now` is still within the token's lifetime.
    /// The expiry instant itself is inclusive.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// The subset a display needs to render the code.
    pub fn display(&self) -> TokenDisplay {
        TokenDisplay {
            value: self.value.clone(),
            epoch: self.epoch,
            expires_at: self.expires_at,
        }
    }
}
