//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use vouch_core::meter::LimitExceeded;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,

  /// Carries an upgrade hint so conversational clients can relay a
  /// subscription link instead of a bare 404.
  #[error("not found: {message}")]
  NotFound {
    message:          String,
    subscription_url: Option<String>,
  },

  #[error("bad request: {0}")]
  BadRequest(String),

  /// A defined metering outcome, not a failure — but it travels the error
  /// channel so handlers can return early.
  #[error("monthly limit exceeded")]
  LimitExceeded(LimitExceeded),

  #[error("downstream processing failed: {0}")]
  Downstream(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<vouch_core::Error> for Error {
  fn from(e: vouch_core::Error) -> Self {
    match e {
      vouch_core::Error::SubscriptionNotFound(id) => Error::NotFound {
        message:          format!("subscription {id} not found"),
        subscription_url: None,
      },
      vouch_core::Error::UserNotFound(email) => Error::NotFound {
        message:          format!("user {email} not found"),
        subscription_url: None,
      },
      vouch_core::Error::InvalidInput(m) => Error::BadRequest(m),
      vouch_core::Error::Store(e) => Error::Store(e),
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Unauthorized => {
        let mut res =
          (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"vouch\""),
        );
        res
      }
      Error::NotFound { message, subscription_url } => (
        StatusCode::NOT_FOUND,
        Json(json!({
          "error": message,
          "subscription_url": subscription_url,
        })),
      )
        .into_response(),
      Error::BadRequest(m) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": m }))).into_response()
      }
      Error::LimitExceeded(limit) => {
        // The primary consumer is a chat agent: the body carries the
        // message to relay, not just a status code.
        let message = format!(
          "You've used all {} free messages for this month. Upgrade to \
           premium for unlimited access, or ask about pricing any time.",
          limit.limit
        );
        (
          StatusCode::TOO_MANY_REQUESTS,
          Json(json!({
            "error": "Monthly limit exceeded",
            "message": message,
            "usage": {
              "current": limit.current,
              "limit": limit.limit,
              "reset_date": limit.reset_date,
            },
          })),
        )
          .into_response()
      }
      Error::Downstream(m) => (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": m })),
      )
        .into_response(),
      Error::Store(e) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
      )
        .into_response(),
    }
  }
}
