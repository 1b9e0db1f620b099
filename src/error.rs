//! Error taxonomy for remote tracker calls.

use thiserror::Error;

/// Failure modes of the remote tracker API.
///
/// Values are cloned into mutation outcomes and cache entries, so every
/// variant owns plain data rather than the underlying library error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
  /// The request never produced an HTTP response (DNS, connect, timeout).
  #[error("transport error: {0}")]
  Transport(String),

  /// The server answered with a non-success status other than 404.
  #[error("api error (status {status}): {message}")]
  Api { status: u16, message: String },

  /// The addressed resource does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// The response body could not be decoded.
  #[error("decode error: {0}")]
  Decode(String),
}

impl RemoteError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound(_))
  }
}
