//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. The user verification
//! snapshot and the usage detail ring buffer are stored as compact JSON.

use chrono::{DateTime, Utc};
use vouch_core::{
  subscription::{Source, Subscription, Tier},
  usage::{MonthKey, UsageDetail, UsageRecord},
  user::{User, Verification},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_opt_dt(dt: Option<DateTime<Utc>>) -> Option<String> {
  dt.map(encode_dt)
}

pub fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Verification snapshot ───────────────────────────────────────────────────

pub fn encode_verification(v: &Verification) -> Result<String> {
  Ok(serde_json::to_string(v)?)
}

pub fn decode_verification(s: &str) -> Result<Verification> {
  Ok(serde_json::from_str(s)?)
}

// ─── Usage details ───────────────────────────────────────────────────────────

pub fn encode_details(details: &[UsageDetail]) -> Result<String> {
  Ok(serde_json::to_string(details)?)
}

pub fn decode_details(s: &str) -> Result<Vec<UsageDetail>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `subscriptions` row.
pub struct RawSubscription {
  pub id:                       String,
  pub email:                    Option<String>,
  pub active:                   bool,
  pub tier:                     String,
  pub source:                   String,
  pub provider_subscription_id: Option<String>,
  pub provider_customer_id:     Option<String>,
  pub current_period_end:       Option<String>,
  pub trial_end:                Option<String>,
  pub notes:                    Option<String>,
  pub created_at:               String,
  pub updated_at:               String,
}

impl RawSubscription {
  pub fn into_subscription(self) -> Result<Subscription> {
    Ok(Subscription {
      id: self.id,
      email: self.email,
      active: self.active,
      tier: Tier::new(self.tier),
      source: Source::from(self.source),
      provider_subscription_id: self.provider_subscription_id,
      provider_customer_id: self.provider_customer_id,
      current_period_end: decode_opt_dt(self.current_period_end)?,
      trial_end: decode_opt_dt(self.trial_end)?,
      notes: self.notes,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `users` row.
pub struct RawUser {
  pub email:             String,
  pub name:              Option<String>,
  pub active:            bool,
  pub subscription_id:   Option<String>,
  pub subscription_tier: String,
  pub verification:      Option<String>,
  pub created_at:        String,
  pub updated_at:        String,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      email: self.email,
      name: self.name,
      active: self.active,
      subscription_id: self.subscription_id,
      subscription_tier: Tier::new(self.subscription_tier),
      verification: self
        .verification
        .as_deref()
        .map(decode_verification)
        .transpose()?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `usage` row.
pub struct RawUsage {
  pub identifier:    String,
  pub month:         String,
  pub message_count: u32,
  pub details:       String,
}

impl RawUsage {
  pub fn into_record(self) -> Result<UsageRecord> {
    Ok(UsageRecord {
      identifier:    self.identifier,
      month:         MonthKey::from(self.month),
      message_count: self.message_count,
      details:       decode_details(&self.details)?,
    })
  }
}
