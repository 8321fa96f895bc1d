//! The Usage Meter and the gate that rate-limits free users per calendar
//! month.
//!
//! The gate returns an explicit [`GateDecision`] value instead of flagging
//! request state: an allowed request carries a by-value [`UsageCharge`]
//! token, and the increment happens only when the caller commits that token
//! after downstream processing succeeds. Move semantics make double-charging
//! unrepresentable, and a rejected or failed request never consumes
//! allowance.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  store::EntitlementStore,
  subscription::TierPolicy,
  usage::{MonthKey, UsageDetail, UsageRecord},
};

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Gate configuration: the free allowance and the keyword classifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePolicy {
  /// Messages per calendar month for non-premium users.
  pub free_limit: u32,
  /// Billing/help/onboarding topics that always pass without counting, so
  /// users are never blocked from asking about or purchasing an upgrade.
  pub exempt_keywords: Vec<String>,
  /// Upgrade-intent topics that pass without counting once a user is
  /// already over the limit.
  pub premium_inquiry_keywords: Vec<String>,
  pub tiers: TierPolicy,
}

impl Default for GatePolicy {
  fn default() -> Self {
    let exempt = [
      "pricing", "price", "billing", "payment", "invoice", "refund",
      "cancel", "help", "support", "how do i", "getting started",
    ];
    let inquiry = ["premium", "upgrade", "subscribe", "subscription", "plan"];
    Self {
      free_limit: 5,
      exempt_keywords: exempt.iter().map(|s| (*s).to_owned()).collect(),
      premium_inquiry_keywords: inquiry
        .iter()
        .map(|s| (*s).to_owned())
        .collect(),
      tiers: TierPolicy::default(),
    }
  }
}

fn matches_any(message: &str, keywords: &[String]) -> bool {
  let lower = message.to_lowercase();
  keywords.iter().any(|k| lower.contains(k.as_str()))
}

// ─── Decisions ───────────────────────────────────────────────────────────────

/// Why a request passed the gate without being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptReason {
  /// Cached premium tier on the user record — unlimited.
  Premium,
  /// Matched the billing/help classifier.
  ExemptTopic,
  /// Over the limit but asking about upgrading.
  PremiumInquiry,
}

/// Structured limit-exceeded outcome — a defined result, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitExceeded {
  pub current:    u32,
  pub limit:      u32,
  pub reset_date: Option<NaiveDate>,
}

/// A pending increment for one allowed request. Consumed by
/// [`UsageGate::commit`]; dropping it (downstream failure) charges nothing.
#[derive(Debug)]
pub struct UsageCharge {
  identifier: String,
  month:      MonthKey,
  detail:     UsageDetail,
}

impl UsageCharge {
  pub fn identifier(&self) -> &str { &self.identifier }
}

/// The gate's answer for one inbound request.
#[derive(Debug)]
pub enum GateDecision {
  /// Proceed; commit the charge after successful processing.
  Allowed(UsageCharge),
  /// Proceed without counting.
  Exempt(ExemptReason),
  /// Reject with the structured limit data.
  Denied(LimitExceeded),
}

// ─── Meter ───────────────────────────────────────────────────────────────────

/// Per-identifier, per-month counters over any store backend.
pub struct UsageMeter<S> {
  store: Arc<S>,
}

impl<S: EntitlementStore> UsageMeter<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// The current month's usage; a zero-valued record if none exists.
  pub async fn monthly_usage(&self, identifier: &str) -> Result<UsageRecord> {
    let month = MonthKey::current();
    let record = self
      .store
      .get_usage(identifier, &month)
      .await
      .map_err(Error::store)?;
    Ok(record.unwrap_or_else(|| UsageRecord::empty(identifier, month)))
  }

  /// Count one message. Read-modify-write against the durable record.
  pub async fn record_message(
    &self,
    identifier: &str,
    detail: UsageDetail,
  ) -> Result<UsageRecord> {
    let mut record = self.monthly_usage(identifier).await?;
    record.record(detail);
    self.store.put_usage(record).await.map_err(Error::store)
  }

  pub async fn has_exceeded(
    &self,
    identifier: &str,
    limit: u32,
  ) -> Result<bool> {
    Ok(self.monthly_usage(identifier).await?.message_count >= limit)
  }

  /// Admin-only: delete the current month's record.
  pub async fn reset(&self, identifier: &str) -> Result<()> {
    let month = MonthKey::current();
    self
      .store
      .delete_usage(identifier, &month)
      .await
      .map_err(Error::store)
  }
}

// ─── Gate ────────────────────────────────────────────────────────────────────

/// The metering gate consulted by every usage-gated entry point.
pub struct UsageGate<S> {
  store:  Arc<S>,
  meter:  UsageMeter<S>,
  policy: GatePolicy,
}

impl<S: EntitlementStore> UsageGate<S> {
  pub fn new(store: Arc<S>, policy: GatePolicy) -> Self {
    Self { meter: UsageMeter::new(Arc::clone(&store)), store, policy }
  }

  pub fn policy(&self) -> &GatePolicy { &self.policy }

  pub fn meter(&self) -> &UsageMeter<S> { &self.meter }

  /// Decide whether a request may proceed.
  ///
  /// `email_hint` links an opaque thread identifier to a user record when
  /// the caller knows the email; otherwise an identifier that itself looks
  /// like an email is used for the premium exemption.
  pub async fn check(
    &self,
    identifier: &str,
    email_hint: Option<&str>,
    message: &str,
    endpoint: &str,
    method: &str,
  ) -> Result<GateDecision> {
    if identifier.is_empty() {
      return Err(Error::InvalidInput("user identifier is required".to_owned()));
    }

    // Premium users skip metering entirely.
    let email = email_hint
      .or_else(|| identifier.contains('@').then_some(identifier));
    if let Some(email) = email
      && let Some(user) =
        self.store.get_user(email).await.map_err(Error::store)?
      && self.policy.tiers.is_entitled(&user.subscription_tier)
    {
      return Ok(GateDecision::Exempt(ExemptReason::Premium));
    }

    if matches_any(message, &self.policy.exempt_keywords) {
      return Ok(GateDecision::Exempt(ExemptReason::ExemptTopic));
    }

    let usage = self.meter.monthly_usage(identifier).await?;
    if usage.message_count >= self.policy.free_limit {
      if matches_any(message, &self.policy.premium_inquiry_keywords) {
        return Ok(GateDecision::Exempt(ExemptReason::PremiumInquiry));
      }
      tracing::debug!(
        identifier,
        count = usage.message_count,
        limit = self.policy.free_limit,
        "monthly limit exceeded"
      );
      return Ok(GateDecision::Denied(LimitExceeded {
        current:    usage.message_count,
        limit:      self.policy.free_limit,
        reset_date: usage.month.reset_date(),
      }));
    }

    Ok(GateDecision::Allowed(UsageCharge {
      identifier: identifier.to_owned(),
      month:      usage.month,
      detail:     UsageDetail::new(message, endpoint, method),
    }))
  }

  /// Consume a charge token and perform its single increment. Called after
  /// downstream processing succeeds, never before.
  ///
  /// The charge is applied to the month captured at check time, so a
  /// request straddling a month boundary stays internally consistent.
  pub async fn commit(&self, charge: UsageCharge) -> Result<UsageRecord> {
    let mut record = self
      .store
      .get_usage(&charge.identifier, &charge.month)
      .await
      .map_err(Error::store)?
      .unwrap_or_else(|| {
        UsageRecord::empty(&charge.identifier, charge.month.clone())
      });
    record.record(charge.detail);
    self.store.put_usage(record).await.map_err(Error::store)
  }
}
