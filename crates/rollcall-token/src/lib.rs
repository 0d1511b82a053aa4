//! Rotating scan tokens for Rollcall.
//!
//! A scan token is the short-lived value rendered as a QR code on the
//! classroom display. It must be impossible to predict the next one from
//! the current one, so each value is an HMAC over the session id, the
//! rotation epoch, and a fresh random nonce, keyed with a server secret.
//!
//! - [`TokenGenerator`]: the seam the attendance core calls.
//! - [`HmacTokenGenerator`]: the production implementation.
//! - [`ScanToken`]: an issued token with its validity bounds.
//! - [`TokenSecret`]: the 256-bit key.

mod error;
mod generator;
mod token;

pub use error::TokenError;
pub use generator::{HmacTokenGenerator, TokenGenerator};
pub use token::{ScanToken, TokenSecret};
