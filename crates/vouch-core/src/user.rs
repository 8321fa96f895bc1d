//! User records — one per email, carrying a cached entitlement summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subscription::{Source, Tier};

/// What convinced the engine that a user is (or was) entitled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
  /// A locally authoritative record — manual or admin grant. There is no
  /// external system for these to desync from.
  Local {
    subscription_id: String,
    source:          Source,
  },
  /// A live provider response.
  Provider {
    provider_subscription_id: String,
    status:                   String,
    current_period_end:       Option<DateTime<Utc>>,
  },
}

/// Cached verification snapshot written by every reconciliation pass that
/// confirms or revokes entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
  pub verified:    bool,
  pub verified_at: DateTime<Utc>,
  pub evidence:    Evidence,
}

/// One user, keyed by email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub email:  String,
  pub name:   Option<String>,
  /// Account-level flag, distinct from any subscription's `active`.
  pub active: bool,

  /// Weak reference to the most recently associated subscription record —
  /// a lookup key, not an ownership relation.
  pub subscription_id: Option<String>,
  /// Denormalised cache of the last-known entitlement tier.
  pub subscription_tier: Tier,
  pub verification: Option<Verification>,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl User {
  /// A fresh active user with no entitlement.
  pub fn new(email: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      email: email.into(),
      name: None,
      active: true,
      subscription_id: None,
      subscription_tier: Tier::free(),
      verification: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// Bump `updated_at` to now.
  pub fn touch(&mut self) { self.updated_at = Utc::now(); }
}
