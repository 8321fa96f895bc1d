//! [`StripeGateway`] — the reqwest client behind the provider gateway.

use std::time::Duration;

use serde::de::DeserializeOwned;
use vouch_core::gateway::{
  CustomerSubscriptions, GatewayError, ProviderGateway, ProviderSubscription,
};

use crate::types::{
  StripeCustomer, StripeErrorBody, StripeList, StripeSubscription,
};

/// Connection settings for the Stripe API.
#[derive(Debug, Clone)]
pub struct StripeConfig {
  pub secret_key: String,
  /// Overridable for tests against a local stub.
  pub base_url: String,
  /// Per-request bound; a slow provider call must never stall the whole
  /// reconciliation chain.
  pub timeout: Duration,
}

impl StripeConfig {
  pub fn new(secret_key: impl Into<String>) -> Self {
    Self {
      secret_key: secret_key.into(),
      base_url:   "https://api.stripe.com".to_owned(),
      timeout:    Duration::from_secs(10),
    }
  }
}

/// Async Stripe client implementing [`ProviderGateway`].
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct StripeGateway {
  client: reqwest::Client,
  config: StripeConfig,
}

impl StripeGateway {
  pub fn new(config: StripeConfig) -> reqwest::Result<Self> {
    let client = reqwest::Client::builder().timeout(config.timeout).build()?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{path}", self.config.base_url.trim_end_matches('/'))
  }

  /// One authenticated GET, with every failure mode folded into
  /// [`GatewayError`].
  async fn get_json<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<T, GatewayError> {
    let response = self
      .client
      .get(self.url(path))
      .bearer_auth(&self.config.secret_key)
      .query(query)
      .send()
      .await
      .map_err(|e| GatewayError::new(format!("stripe request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
      let detail = response
        .json::<StripeErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error.message)
        .unwrap_or_else(|| status.to_string());
      tracing::warn!(%status, path, "stripe API error");
      return Err(GatewayError::new(format!("stripe {status}: {detail}")));
    }

    response
      .json::<T>()
      .await
      .map_err(|e| GatewayError::new(format!("stripe decode failed: {e}")))
  }

  async fn subscriptions_for_customer(
    &self,
    customer_id: &str,
  ) -> Result<Vec<ProviderSubscription>, GatewayError> {
    let list: StripeList<StripeSubscription> = self
      .get_json(
        "/v1/subscriptions",
        &[
          ("customer", customer_id.to_owned()),
          ("status", "all".to_owned()),
          ("limit", "100".to_owned()),
        ],
      )
      .await?;
    Ok(list.data.into_iter().map(StripeSubscription::normalize).collect())
  }
}

impl ProviderGateway for StripeGateway {
  async fn verify_subscription(
    &self,
    provider_subscription_id: &str,
  ) -> Result<ProviderSubscription, GatewayError> {
    let sub: StripeSubscription = self
      .get_json(
        &format!("/v1/subscriptions/{provider_subscription_id}"),
        &[],
      )
      .await?;
    Ok(sub.normalize())
  }

  async fn list_by_customer(
    &self,
    customer_id: &str,
  ) -> Result<Vec<ProviderSubscription>, GatewayError> {
    self.subscriptions_for_customer(customer_id).await
  }

  async fn list_by_email(
    &self,
    email: &str,
  ) -> Result<CustomerSubscriptions, GatewayError> {
    let customers: StripeList<StripeCustomer> = self
      .get_json(
        "/v1/customers",
        &[("email", email.to_owned()), ("limit", "10".to_owned())],
      )
      .await?;

    // Multiple customers can share an email; union their subscriptions.
    let mut subscriptions = Vec::new();
    for customer in &customers.data {
      subscriptions.extend(self.subscriptions_for_customer(&customer.id).await?);
    }
    Ok(CustomerSubscriptions {
      customer_id: customers.data.first().map(|c| c.id.clone()),
      subscriptions,
    })
  }

  async fn list_all(
    &self,
    status: Option<&str>,
    page_limit: u32,
  ) -> Result<Vec<ProviderSubscription>, GatewayError> {
    let mut query = vec![("limit", page_limit.to_string())];
    query.push((
      "status",
      status.unwrap_or("all").to_owned(),
    ));
    let list: StripeList<StripeSubscription> =
      self.get_json("/v1/subscriptions", &query).await?;
    Ok(list.data.into_iter().map(StripeSubscription::normalize).collect())
  }
}
