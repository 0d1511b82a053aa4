//! Token generation.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use rollcall_protocol::SessionId;
use sha2::Sha256;

use crate::{ScanToken, TokenSecret};

type HmacSha256 = Hmac<Sha256>;

/// Domain separator mixed into every MAC so these tokens can never
/// collide with another use of the same key.
const DOMAIN: &[u8] = b"rollcall/scan-token/v1";

/// Issues scan tokens for a session's rotation epochs.
///
/// The attendance session calls [`issue`](Self::issue) exactly once per
/// epoch and caches the result; tokens are never regenerated on demand.
///
/// # Contract
///
/// Two calls with the same `(session_id, epoch)` must return different
/// values. Implementations must therefore mix in fresh randomness and
/// may not derive the value from time alone.
pub trait TokenGenerator: Send + Sync + 'static {
    /// Issues the token for `epoch` of `session_id`, valid from
    /// `issued_at` through `expires_at`.
    fn issue(
        &self,
        session_id: SessionId,
        epoch: u64,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> ScanToken;
}

/// HMAC-SHA256 over `(domain, session id, epoch, 128-bit nonce)`.
#[derive(Debug, Clone)]
pub struct HmacTokenGenerator {
    secret: TokenSecret,
}

impl HmacTokenGenerator {
    pub fn new(secret: TokenSecret) -> Self {
        Self { secret }
    }

    /// A generator with a freshly drawn random key.
    pub fn with_random_secret() -> Self {
        Self::new(TokenSecret::generate())
    }

    fn mac(&self, session_id: SessionId, epoch: u64, nonce: &[u8; 16]) -> String {
        // HMAC is defined for keys of any length, so this cannot fail.
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(DOMAIN);
        mac.update(&session_id.0.to_be_bytes());
        mac.update(&epoch.to_be_bytes());
        mac.update(nonce);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl TokenGenerator for HmacTokenGenerator {
    fn issue(
        &self,
        session_id: SessionId,
        epoch: u64,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> ScanToken {
        let nonce: [u8; 16] = rand::rng().random();
        let value = self.mac(session_id, epoch, &nonce);

        tracing::trace!(%session_id, epoch, %expires_at, "scan token issued");

        ScanToken {
            value,
            session_id,
            epoch,
            issued_at,
            expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn bounds() -> (DateTime<Utc>, DateTime<Utc>) {
        let at = Utc.with_ymd_and_hms(2026, 4, 20, 14, 0, 0).unwrap();
        (at, at + TimeDelta::seconds(30))
    }

    #[test]
    fn test_issue_carries_inputs_through() {
        let generator = HmacTokenGenerator::with_random_secret();
        let (issued, expires) = bounds();

        let token = generator.issue(SessionId(3), 7, issued, expires);

        assert_eq!(token.session_id, SessionId(3));
        assert_eq!(token.epoch, 7);
        assert_eq!(token.issued_at, issued);
        assert_eq!(token.expires_at, expires);
    }

    #[test]
    fn test_issue_value_is_64_lowercase_hex_chars() {
        let generator = HmacTokenGenerator::with_random_secret();
        let (issued, expires) = bounds();

        let token = generator.issue(SessionId(1), 1, issued, expires);

        assert_eq!(token.value.len(), 64);
        assert!(token.value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_issue_same_session_and_epoch_yields_different_values() {
        let generator = HmacTokenGenerator::with_random_secret();
        let (issued, expires) = bounds();

        let a = generator.issue(SessionId(1), 1, issued, expires);
        let b = generator.issue(SessionId(1), 1, issued, expires);

        assert_ne!(a.value, b.value, "replaying (session, epoch) must not repeat a value");
    }

    #[test]
    fn test_issue_never_repeats_across_sessions_and_epochs() {
        let generator = HmacTokenGenerator::with_random_secret();
        let (issued, expires) = bounds();
        let mut seen = HashSet::new();

        for session in 1..=20 {
            for epoch in 1..=20 {
                let token = generator.issue(SessionId(session), epoch, issued, expires);
                assert!(seen.insert(token.value), "duplicate token value");
            }
        }
    }

    #[test]
    fn test_same_key_and_nonce_is_deterministic() {
        // The randomness comes from the nonce alone; with it pinned the
        // MAC is a pure function of its inputs.
        let secret = TokenSecret::from_hex(&"11".repeat(32)).unwrap();
        let generator = HmacTokenGenerator::new(secret);
        let nonce = [9u8; 16];

        let a = generator.mac(SessionId(5), 2, &nonce);
        let b = generator.mac(SessionId(5), 2, &nonce);
        let other_epoch = generator.mac(SessionId(5), 3, &nonce);

        assert_eq!(a, b);
        assert_ne!(a, other_epoch);
    }
}
