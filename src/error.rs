//! Error taxonomy shared by the store, the cache layer and the HTTP boundary.

use thiserror::Error;

/// Errors surfaced by resource operations.
///
/// A delete or update that matches no rows is not an error; see
/// [`Outcome`](crate::store::Outcome).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
  /// Store unreachable, handshake failed, or the handle has been shut down.
  #[error("connection error: {0}")]
  Connection(String),

  /// Caller supplied an empty or malformed payload or an unknown identifier.
  /// Raised before any round trip to the store.
  #[error("validation error: {0}")]
  Validation(String),

  /// The store rejected the operation. Carries the store's original message.
  #[error("store error: {0}")]
  Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn connection(msg: impl Into<String>) -> Self {
    Self::Connection(msg.into())
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub fn store(msg: impl Into<String>) -> Self {
    Self::Store(msg.into())
  }

  /// The message without the kind prefix.
  pub fn message(&self) -> &str {
    match self {
      Self::Connection(msg) | Self::Validation(msg) | Self::Store(msg) => msg,
    }
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Self::Store(e.to_string())
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    if e.is_connect() || e.is_timeout() {
      Self::Connection(e.to_string())
    } else {
      Self::Store(e.to_string())
    }
  }
}

impl From<tokio::task::JoinError> for Error {
  fn from(e: tokio::task::JoinError) -> Self {
    Self::Store(format!("store task failed: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_store_error_keeps_original_message() {
    let err: Error = rusqlite::Error::InvalidQuery.into();
    match err {
      Error::Store(msg) => assert_eq!(msg, rusqlite::Error::InvalidQuery.to_string()),
      other => panic!("expected store error, got {:?}", other),
    }
  }

  #[test]
  fn test_display_names_the_kind() {
    assert_eq!(
      Error::validation("record is empty").to_string(),
      "validation error: record is empty"
    );
  }
}
