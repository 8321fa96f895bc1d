//! Wire types for the subset of the Stripe API vouch consumes, and their
//! normalisation into the core's provider shapes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use vouch_core::gateway::ProviderSubscription;

/// Statuses Stripe reports that count as a live entitlement.
const ACTIVE_STATUSES: [&str; 2] = ["active", "trialing"];

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
  secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// `GET /v1/subscriptions/{id}` response (fields we read).
#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
  pub id:     String,
  pub status: String,
  /// Expandable customer reference; we never expand, so it is a bare id.
  pub customer: Option<String>,
  pub current_period_end: Option<i64>,
  pub canceled_at:        Option<i64>,
  pub trial_end:          Option<i64>,
}

impl StripeSubscription {
  pub fn normalize(self) -> ProviderSubscription {
    let active = ACTIVE_STATUSES.contains(&self.status.as_str());
    ProviderSubscription {
      id: self.id,
      active,
      customer_id: self.customer,
      current_period_end: from_unix(self.current_period_end),
      canceled_at: from_unix(self.canceled_at),
      trial_end: from_unix(self.trial_end),
      status: self.status,
    }
  }
}

/// Stripe's generic list envelope.
#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
  pub data:     Vec<T>,
  #[serde(default)]
  pub has_more: bool,
}

/// `GET /v1/customers` response item (fields we read).
#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
  pub id:    String,
  pub email: Option<String>,
}

/// Error envelope Stripe returns on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct StripeErrorBody {
  pub error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorDetail {
  pub message: Option<String>,
  #[serde(rename = "type")]
  pub kind:    Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn subscription_decodes_and_normalizes_active() {
    let json = r#"{
      "id": "sub_123",
      "object": "subscription",
      "status": "active",
      "customer": "cus_9",
      "current_period_end": 1767225600,
      "canceled_at": null,
      "trial_end": null
    }"#;
    let sub: StripeSubscription = serde_json::from_str(json).unwrap();
    let normalized = sub.normalize();
    assert!(normalized.active);
    assert_eq!(normalized.id, "sub_123");
    assert_eq!(normalized.customer_id.as_deref(), Some("cus_9"));
    assert_eq!(
      normalized.current_period_end.unwrap().timestamp(),
      1_767_225_600
    );
  }

  #[test]
  fn trialing_counts_as_active_and_canceled_does_not() {
    for (status, expect) in
      [("trialing", true), ("canceled", false), ("past_due", false)]
    {
      let sub = StripeSubscription {
        id:     "sub_x".to_owned(),
        status: status.to_owned(),
        customer: None,
        current_period_end: None,
        canceled_at: None,
        trial_end: None,
      };
      assert_eq!(sub.normalize().active, expect, "status {status}");
    }
  }

  #[test]
  fn list_envelope_decodes() {
    let json = r#"{
      "object": "list",
      "data": [{"id": "cus_1", "email": "a@x.com"}],
      "has_more": false
    }"#;
    let list: StripeList<StripeCustomer> = serde_json::from_str(json).unwrap();
    assert_eq!(list.data.len(), 1);
    assert_eq!(list.data[0].email.as_deref(), Some("a@x.com"));
  }

  #[test]
  fn error_envelope_decodes() {
    let json = r#"{
      "error": {"message": "No such subscription", "type": "invalid_request_error"}
    }"#;
    let body: StripeErrorBody = serde_json::from_str(json).unwrap();
    assert_eq!(body.error.message.as_deref(), Some("No such subscription"));
    assert_eq!(body.error.kind.as_deref(), Some("invalid_request_error"));
  }
}
