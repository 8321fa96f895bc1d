//! Async HTTP client wrapping the vouch JSON API.

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use vouch_core::resolve::{Decision, SweepReport};

/// Connection settings for the vouch API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
  pub username: String,
  pub password: String,
}

/// Async HTTP client for the vouch JSON REST API.
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!(
      "{}/api{}",
      self.config.base_url.trim_end_matches('/'),
      path
    )
  }

  fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    if self.config.username.is_empty() {
      req
    } else {
      req.basic_auth(&self.config.username, Some(&self.config.password))
    }
  }

  /// Read an error body for context, falling back to the bare status.
  async fn failure(label: &str, resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    match resp.text().await {
      Ok(body) if !body.is_empty() => anyhow!("{label} → {status}: {body}"),
      _ => anyhow!("{label} → {status}"),
    }
  }

  // ── Entitlement ───────────────────────────────────────────────────────────

  /// `POST /api/entitlement/check` with `{"email": …}`
  pub async fn check_email(&self, email: &str) -> Result<Decision> {
    self.check(json!({ "email": email })).await
  }

  /// `POST /api/entitlement/check` with `{"subscription_id": …}`
  pub async fn check_subscription(&self, id: &str) -> Result<Decision> {
    self.check(json!({ "subscription_id": id })).await
  }

  async fn check(&self, body: Value) -> Result<Decision> {
    let resp = self
      .client
      .post(self.url("/entitlement/check"))
      .json(&body)
      .send()
      .await
      .context("POST /entitlement/check failed")?;

    if !resp.status().is_success() {
      return Err(Self::failure("POST /entitlement/check", resp).await);
    }
    resp.json().await.context("deserialising decision")
  }

  // ── Usage ─────────────────────────────────────────────────────────────────

  /// `GET /api/usage/{identifier}`
  pub async fn usage(&self, identifier: &str) -> Result<Value> {
    let resp = self
      .client
      .get(self.url(&format!("/usage/{identifier}")))
      .send()
      .await
      .context("GET /usage failed")?;

    if !resp.status().is_success() {
      return Err(Self::failure("GET /usage", resp).await);
    }
    resp.json().await.context("deserialising usage")
  }

  // ── Admin ─────────────────────────────────────────────────────────────────

  /// `POST /api/admin/sweep`
  pub async fn sweep(&self) -> Result<SweepReport> {
    let resp = self
      .auth(self.client.post(self.url("/admin/sweep")))
      .send()
      .await
      .context("POST /admin/sweep failed")?;

    if !resp.status().is_success() {
      return Err(Self::failure("POST /admin/sweep", resp).await);
    }
    resp.json().await.context("deserialising sweep report")
  }

  /// `POST /api/admin/usage/{identifier}/reset`
  pub async fn reset_usage(&self, identifier: &str) -> Result<()> {
    let resp = self
      .auth(
        self
          .client
          .post(self.url(&format!("/admin/usage/{identifier}/reset"))),
      )
      .send()
      .await
      .context("POST /admin/usage/reset failed")?;

    if !resp.status().is_success() {
      return Err(Self::failure("POST /admin/usage/reset", resp).await);
    }
    Ok(())
  }
}
