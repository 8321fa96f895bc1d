//! Error types for `vouch-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// No subscription record exists under this id, locally or at the
  /// provider. Distinct from "found but inactive", which is a successful
  /// resolution with `active = false`.
  #[error("subscription not found: {0}")]
  SubscriptionNotFound(String),

  #[error("user not found: {0}")]
  UserNotFound(String),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// A store read or write failed. Persistence failures are fatal for the
  /// request: a decision that cannot be durably recorded is not granted.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a backend store error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Error::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
