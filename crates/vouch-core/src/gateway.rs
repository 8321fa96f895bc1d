//! The `ProviderGateway` trait — a façade over the payment provider's
//! subscription/customer query API.
//!
//! Failure semantics: a gateway call never panics and never surfaces a
//! transport or provider error as anything but [`GatewayError`]. Callers
//! must treat an error as "could not confirm", not "confirmed inactive" —
//! the Reconciliation Engine keeps trying alternate sources.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A provider call that could not be completed — network, auth, timeout, or
/// provider-side not-found. Carries a message for logs; never shown to end
/// users verbatim.
#[derive(Debug, Clone, Error)]
#[error("provider unavailable: {message}")]
pub struct GatewayError {
  pub message: String,
}

impl GatewayError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

/// A provider subscription, normalised into the core's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSubscription {
  pub id:     String,
  /// Provider status vocabulary, e.g. `active`, `trialing`, `past_due`,
  /// `canceled`.
  pub status: String,
  /// Normalised: `status` is `active` or `trialing`.
  pub active: bool,

  pub customer_id:        Option<String>,
  pub current_period_end: Option<DateTime<Utc>>,
  pub canceled_at:        Option<DateTime<Utc>>,
  pub trial_end:          Option<DateTime<Utc>>,
}

/// Result of a provider-side lookup by email. Multiple customers sharing an
/// email union their subscriptions; `customer_id` is the first match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerSubscriptions {
  pub customer_id:   Option<String>,
  pub subscriptions: Vec<ProviderSubscription>,
}

pub trait ProviderGateway: Send + Sync {
  /// Look up a single subscription by its provider id.
  fn verify_subscription<'a>(
    &'a self,
    provider_subscription_id: &'a str,
  ) -> impl Future<Output = Result<ProviderSubscription, GatewayError>> + Send + 'a;

  /// All subscriptions belonging to a provider customer.
  fn list_by_customer<'a>(
    &'a self,
    customer_id: &'a str,
  ) -> impl Future<Output = Result<Vec<ProviderSubscription>, GatewayError>> + Send + 'a;

  /// Customer lookup by email, then the union of all their subscriptions.
  fn list_by_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<CustomerSubscriptions, GatewayError>> + Send + 'a;

  /// Paged listing for batch/admin stats paths — never on the hot
  /// reconciliation path.
  fn list_all<'a>(
    &'a self,
    status: Option<&'a str>,
    page_limit: u32,
  ) -> impl Future<Output = Result<Vec<ProviderSubscription>, GatewayError>> + Send + 'a;
}
