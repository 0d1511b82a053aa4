//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding wire messages.
///
/// Each crate in Rollcall defines its own error enum, so a
/// `ProtocolError` always means the problem is in serialization, not in
/// networking or attendance bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, wrong
    /// types, or an unknown message tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but breaks a protocol rule, for example a
    /// request arriving before the handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
