//! The downstream message processor behind the usage gate.
//!
//! The gate decides; something else answers. In production that is a
//! configured webhook worker; without one the relay echoes, which keeps
//! development and tests self-contained.

use std::{future::Future, time::Duration};

use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DownstreamError {
  pub message: String,
}

impl DownstreamError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

/// Processes one gated message and produces the response payload.
pub trait Downstream: Send + Sync {
  fn handle<'a>(
    &'a self,
    identifier: &'a str,
    message: &'a str,
  ) -> impl Future<Output = Result<Value, DownstreamError>> + Send + 'a;
}

/// Relays messages to a webhook worker, or echoes when none is configured.
#[derive(Clone)]
pub struct WebhookRelay {
  client: reqwest::Client,
  url:    Option<String>,
}

impl WebhookRelay {
  pub fn new(url: Option<String>, timeout: Duration) -> reqwest::Result<Self> {
    if url.is_none() {
      tracing::warn!("no downstream webhook configured; echoing messages");
    }
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url })
  }
}

impl Downstream for WebhookRelay {
  async fn handle(
    &self,
    identifier: &str,
    message: &str,
  ) -> Result<Value, DownstreamError> {
    let Some(url) = &self.url else {
      return Ok(json!({ "reply": message }));
    };

    let response = self
      .client
      .post(url)
      .json(&json!({ "user_identifier": identifier, "message": message }))
      .send()
      .await
      .map_err(|e| DownstreamError::new(format!("webhook request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
      return Err(DownstreamError::new(format!("webhook returned {status}")));
    }
    response
      .json::<Value>()
      .await
      .map_err(|e| DownstreamError::new(format!("webhook decode failed: {e}")))
  }
}
