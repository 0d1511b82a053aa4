//! Codec trait and implementations for turning messages into bytes.
//!
//! The protocol layer doesn't care HOW an [`Envelope`](crate::Envelope)
//! is serialized; it only needs something implementing [`Codec`].
//! [`JsonCodec`] is the default because scanning clients are usually
//! browsers or phone apps, and JSON is what they speak natively.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes bytes back into values.
///
/// ## Trait bounds
///
/// - `Send + Sync` → one codec instance is shared by every connection
///   task the server spawns.
/// - `'static` → it lives inside long-running tasks, so it may not
///   borrow temporary data.
///
/// `decode` returns `DeserializeOwned` values so the receive buffer can
/// be dropped as soon as the message is parsed.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// Behind the `json` feature (enabled by default).
///
/// ## Example
///
/// ```rust
/// use rollcall_protocol::{Codec, Envelope, JsonCodec, Message, SessionId};
///
/// let codec = JsonCodec;
/// let envelope = Envelope {
///     seq: 3,
///     timestamp: 1200,
///     payload: Message::GetCounts { session_id: SessionId(7) },
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
