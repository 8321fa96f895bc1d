//! Subscription records — one grant of access, from any origin.
//!
//! A record with `active = true` and a premium-equivalent tier is sufficient
//! on its own to grant entitlement, regardless of source. Currency is the
//! Reconciliation Engine's job: a stale `active = true` mirrored from a
//! cancelled provider subscription is corrected on the next resolve, not
//! prevented structurally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Source ──────────────────────────────────────────────────────────────────

/// How and where a subscription record entered the store.
///
/// Used for precedence and audit only — access decisions look at `active`
/// and tier, never at the source directly. The set is open: sources we have
/// not seen before round-trip through [`Source::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
  /// Granted by hand, outside any payment provider.
  Manual,
  /// Granted through the admin surface.
  AdminAdded,
  Stripe,
  StripeWebhook,
  /// Synthesised from a live provider query that found no local mirror.
  StripeDirectFetch,
  GumroadApi,
  GumroadApiLinked,
  Other(String),
}

impl Source {
  pub fn as_str(&self) -> &str {
    match self {
      Source::Manual => "manual",
      Source::AdminAdded => "admin_added",
      Source::Stripe => "stripe",
      Source::StripeWebhook => "stripe_webhook",
      Source::StripeDirectFetch => "stripe_direct_fetch",
      Source::GumroadApi => "gumroad_api",
      Source::GumroadApiLinked => "gumroad_api_linked",
      Source::Other(s) => s,
    }
  }

  /// Whether this source names an external payment provider, i.e. there is
  /// a live system the record can be re-verified against.
  pub fn is_external(&self) -> bool {
    let s = self.as_str();
    s.contains("stripe") || s.contains("gumroad")
  }
}

impl From<String> for Source {
  fn from(s: String) -> Self {
    match s.as_str() {
      "manual" => Source::Manual,
      "admin_added" => Source::AdminAdded,
      "stripe" => Source::Stripe,
      "stripe_webhook" => Source::StripeWebhook,
      "stripe_direct_fetch" => Source::StripeDirectFetch,
      "gumroad_api" => Source::GumroadApi,
      "gumroad_api_linked" => Source::GumroadApiLinked,
      _ => Source::Other(s),
    }
  }
}

impl From<Source> for String {
  fn from(s: Source) -> Self { s.as_str().to_owned() }
}

impl std::fmt::Display for Source {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Tier ────────────────────────────────────────────────────────────────────

/// A subscription tier string.
///
/// The source systems use an open set of tier names (`premium`,
/// `manual_premium`, `admin_added`, provider nicknames). Which of them count
/// as premium-equivalent is configuration, not code — see [`TierPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(String);

impl Tier {
  pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }

  pub fn premium() -> Self { Self("premium".to_owned()) }

  pub fn free() -> Self { Self("free".to_owned()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for Tier {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl std::fmt::Display for Tier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// The configured set of premium-equivalent tier strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicy {
  pub entitled: Vec<String>,
}

impl Default for TierPolicy {
  fn default() -> Self {
    Self {
      entitled: vec![
        "premium".to_owned(),
        "manual_premium".to_owned(),
        "admin_added".to_owned(),
      ],
    }
  }
}

impl TierPolicy {
  /// Whether `tier` grants premium entitlement.
  ///
  /// A tier string that is neither entitled nor `free` has not been
  /// classified; it is treated as non-premium and flagged at warn so an
  /// operator can add it to the configuration.
  pub fn is_entitled(&self, tier: &Tier) -> bool {
    if self.entitled.iter().any(|t| t == tier.as_str()) {
      return true;
    }
    if tier.as_str() != "free" && !tier.as_str().is_empty() {
      tracing::warn!(tier = tier.as_str(), "unclassified tier treated as non-premium");
    }
    false
  }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// One grant of access. A user may accumulate several over time; `email` is
/// not unique across records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
  pub id:     String,
  pub email:  Option<String>,
  /// Current validity as last known. May be stale until reconciled.
  pub active: bool,
  pub tier:   Tier,
  pub source: Source,

  /// Provider-side identifiers, present when `source` is external.
  pub provider_subscription_id: Option<String>,
  pub provider_customer_id:     Option<String>,

  pub current_period_end: Option<DateTime<Utc>>,
  pub trial_end:          Option<DateTime<Utc>>,

  /// Free-form operator notes; carried forward by re-verification, lost by
  /// a fresh synthesis — one reason mirrored records take precedence over
  /// blind fetches.
  pub notes: Option<String>,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Subscription {
  /// A new inactive record with the given identity; callers fill in the
  /// rest before persisting.
  pub fn new(id: impl Into<String>, source: Source) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      email: None,
      active: false,
      tier: Tier::free(),
      source,
      provider_subscription_id: None,
      provider_customer_id: None,
      current_period_end: None,
      trial_end: None,
      notes: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// Bump `updated_at` to now.
  pub fn touch(&mut self) { self.updated_at = Utc::now(); }
}
