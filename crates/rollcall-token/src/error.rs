//! Error types for the token layer.

/// Errors raised while loading token key material.
///
/// Issuing a token never fails once a generator exists; only parsing a
/// configured secret can.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The configured secret is not valid hex.
    #[error("token secret is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The configured secret decodes to the wrong number of bytes.
    #[error("token secret must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
