//! The Reconciliation Engine.
//!
//! Determines whether a user currently holds a valid premium entitlement by
//! walking three eventually-consistent sources in precedence order:
//!
//! 1. locally authoritative grants (manual/admin) — confirmed without any
//!    external call, since there is no external system to desync from;
//! 2. locally mirrored provider grants, re-verified live — re-verification
//!    carries forward local metadata a fresh synthesis would lose;
//! 3. a direct provider query by email, synthesising a local mirror record.
//!
//! The chain short-circuits on the first confirmed-active hit and writes the
//! confirmation through to the user and subscription records. A failed
//! gateway call never aborts the chain; only exhausting every step yields a
//! negative decision.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  gateway::{ProviderGateway, ProviderSubscription},
  store::EntitlementStore,
  subscription::{Source, Subscription, Tier, TierPolicy},
  user::{Evidence, User, Verification},
};

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Feature limits granted to premium users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureLimits {
  pub search_limit:  u32,
  pub profile_limit: u32,
}

impl Default for FeatureLimits {
  fn default() -> Self {
    Self { search_limit: 100, profile_limit: 50 }
  }
}

/// Configuration for the engine: which tiers count as premium-equivalent,
/// and what a premium decision unlocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilePolicy {
  pub tiers:    TierPolicy,
  pub features: FeatureLimits,
}

// ─── Decision ────────────────────────────────────────────────────────────────

/// Feature flags returned alongside every decision, fully determined by
/// premium-or-not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
  pub can_search:           bool,
  pub can_analyze_profiles: bool,
  pub search_limit:         u32,
  pub profile_limit:        u32,
}

impl FeatureSet {
  pub fn premium(limits: FeatureLimits) -> Self {
    Self {
      can_search:           true,
      can_analyze_profiles: true,
      search_limit:         limits.search_limit,
      profile_limit:        limits.profile_limit,
    }
  }

  pub fn none() -> Self {
    Self {
      can_search:           false,
      can_analyze_profiles: false,
      search_limit:         0,
      profile_limit:        0,
    }
  }
}

/// The engine's definitive answer for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
  pub active: bool,
  pub tier:   Tier,
  pub features: FeatureSet,
  pub has_valid_subscription: bool,
  pub email:           Option<String>,
  pub subscription_id: Option<String>,
}

impl Decision {
  fn denied(email: Option<String>, subscription_id: Option<String>) -> Self {
    Self {
      active: false,
      tier: Tier::free(),
      features: FeatureSet::none(),
      has_valid_subscription: false,
      email,
      subscription_id,
    }
  }
}

// ─── Sweep report ────────────────────────────────────────────────────────────

/// Outcome of [`Reconciler::sweep`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
  /// Records reconstructed from user caches.
  pub recovered: u32,
  /// Dangling index rows removed because nothing could reconstruct them.
  pub dropped: u32,
  pub missing_by_source:      HashMap<String, u32>,
  pub total_subscriptions:    usize,
  pub subscriptions_by_source: HashMap<String, u32>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The Reconciliation Engine, generic over the store backend and the
/// provider gateway.
pub struct Reconciler<S, G> {
  store:   Arc<S>,
  gateway: Arc<G>,
  policy:  ReconcilePolicy,
}

impl<S, G> Reconciler<S, G>
where
  S: EntitlementStore,
  G: ProviderGateway,
{
  pub fn new(store: Arc<S>, gateway: Arc<G>, policy: ReconcilePolicy) -> Self {
    Self { store, gateway, policy }
  }

  pub fn policy(&self) -> &ReconcilePolicy { &self.policy }

  // ── Resolution by email ───────────────────────────────────────────────

  /// Walk the precedence chain for `email` and return a definitive
  /// decision, writing any newly confirmed state back to the store.
  ///
  /// Idempotent: re-running with unchanged external state yields the same
  /// decision and creates no duplicate records.
  pub async fn resolve_by_email(&self, email: &str) -> Result<Decision> {
    if email.is_empty() {
      return Err(Error::InvalidInput("email is required".to_owned()));
    }

    let records = self
      .store
      .subscriptions_for_email(email)
      .await
      .map_err(Error::store)?;

    // Stable candidate order regardless of map iteration.
    let mut ids: Vec<&String> = records.keys().collect();
    ids.sort();

    // Step 1: locally authoritative records confirm without an external
    // call.
    for id in &ids {
      let record = &records[id.as_str()];
      if record.active && self.policy.tiers.is_entitled(&record.tier) {
        tracing::debug!(email, id = %record.id, source = %record.source, "confirmed by local record");
        let evidence = Evidence::Local {
          subscription_id: record.id.clone(),
          source:          record.source.clone(),
        };
        return self.confirm(record.clone(), evidence).await;
      }
    }

    // Step 2: locally mirrored provider records, re-verified live.
    for id in &ids {
      let record = &records[id.as_str()];
      if !record.source.is_external() {
        continue;
      }
      let Some(pid) = record.provider_subscription_id.as_deref() else {
        continue;
      };
      match self.gateway.verify_subscription(pid).await {
        Ok(provider) if provider.active => {
          tracing::debug!(email, id = %record.id, pid, "confirmed by provider re-verification");
          let mut record = record.clone();
          record.apply_provider(&provider);
          let evidence = Evidence::provider(&provider);
          return self.confirm(record, evidence).await;
        }
        Ok(provider) => {
          tracing::debug!(email, pid, status = %provider.status, "mirrored record inactive at provider");
        }
        Err(e) => {
          // Could not confirm — not confirmed inactive. Keep walking.
          tracing::warn!(email, pid, error = %e, "provider verification unavailable");
        }
      }
    }

    // Step 3: direct provider query by email.
    match self.gateway.list_by_email(email).await {
      Ok(found) => {
        if let Some(provider) =
          found.subscriptions.iter().find(|s| s.active)
        {
          let record = self.mirror_record(email, provider).await?;
          let evidence = Evidence::provider(provider);
          return self.confirm(record, evidence).await;
        }
      }
      Err(e) => {
        tracing::warn!(email, error = %e, "provider email lookup unavailable");
      }
    }

    // Nothing confirmed.
    self.revoke_cached(email).await?;
    Ok(Decision::denied(Some(email.to_owned()), None))
  }

  // ── Resolution by subscription id ─────────────────────────────────────

  /// Resolve a single subscription id.
  ///
  /// A record that exists but cannot be confirmed resolves to an inactive
  /// decision; an id unknown both locally and at the provider is
  /// [`Error::SubscriptionNotFound`] — callers need the distinction to
  /// prompt re-subscription vs. registration.
  pub async fn resolve_by_id(&self, id: &str) -> Result<Decision> {
    if id.is_empty() {
      return Err(Error::InvalidInput("subscription id is required".to_owned()));
    }

    if let Some(record) =
      self.store.get_subscription(id).await.map_err(Error::store)?
    {
      // Run the full chain over the owning email so sibling records can
      // confirm where this one cannot.
      if let Some(email) = record.email.clone() {
        let mut decision = self.resolve_by_email(&email).await?;
        if decision.subscription_id.is_none() {
          decision.subscription_id = Some(record.id);
        }
        return Ok(decision);
      }

      if record.active && self.policy.tiers.is_entitled(&record.tier) {
        let evidence = Evidence::Local {
          subscription_id: record.id.clone(),
          source:          record.source.clone(),
        };
        return self.confirm(record, evidence).await;
      }

      if let Some(pid) = record.provider_subscription_id.as_deref() {
        if let Ok(provider) = self.gateway.verify_subscription(pid).await
          && provider.active
        {
          let mut record = record.clone();
          record.apply_provider(&provider);
          let evidence = Evidence::provider(&provider);
          return self.confirm(record, evidence).await;
        }
      }

      return Ok(Decision::denied(None, Some(record.id)));
    }

    // No local record — the id may be a provider subscription id the
    // mirror has never seen.
    match self.gateway.verify_subscription(id).await {
      Ok(provider) if provider.active => {
        let record = self.mirror_unowned(&provider).await?;
        let evidence = Evidence::provider(&provider);
        self.confirm(record, evidence).await
      }
      Ok(provider) => Ok(Decision::denied(None, Some(provider.id))),
      Err(_) => Err(Error::SubscriptionNotFound(id.to_owned())),
    }
  }

  // ── Admin sweep ───────────────────────────────────────────────────────

  /// Scan all users and index entries for subscription ids missing from
  /// the primary store, reconstructing minimal records from the owning
  /// user's cached fields. Operator-triggered only — O(users × records).
  pub async fn sweep(&self) -> Result<SweepReport> {
    let users = self.store.all_users().await.map_err(Error::store)?;
    let mut subscriptions =
      self.store.all_subscriptions().await.map_err(Error::store)?;

    let mut report = SweepReport::default();

    // Users whose weak reference points at nothing.
    let mut emails: Vec<&String> = users.keys().collect();
    emails.sort();
    for email in emails {
      let user = &users[email.as_str()];
      let Some(sub_id) = user.subscription_id.as_deref() else {
        continue;
      };
      if subscriptions.contains_key(sub_id) {
        continue;
      }
      let record = reconstruct(sub_id, user);
      tracing::info!(email = %email, sub_id, source = %record.source, "recovered orphaned subscription");
      *report
        .missing_by_source
        .entry(record.source.as_str().to_owned())
        .or_insert(0) += 1;
      report.recovered += 1;
      let record =
        self.store.put_subscription(record).await.map_err(Error::store)?;
      subscriptions.insert(record.id.clone(), record);
    }

    // Index rows pointing at records that no longer exist.
    let index = self.store.email_index().await.map_err(Error::store)?;
    let mut index_emails: Vec<&String> = index.keys().collect();
    index_emails.sort();
    for email in index_emails {
      for id in &index[email.as_str()] {
        if subscriptions.contains_key(id) {
          continue;
        }
        let owner = users
          .get(email.as_str())
          .filter(|u| u.subscription_id.as_deref() == Some(id));
        match owner {
          Some(user) => {
            let record = reconstruct(id, user);
            *report
              .missing_by_source
              .entry(record.source.as_str().to_owned())
              .or_insert(0) += 1;
            report.recovered += 1;
            let record = self
              .store
              .put_subscription(record)
              .await
              .map_err(Error::store)?;
            subscriptions.insert(record.id.clone(), record);
          }
          None => {
            tracing::info!(email = %email, id = %id, "dropping dangling index entry");
            self
              .store
              .remove_index_entry(email, id)
              .await
              .map_err(Error::store)?;
            report.dropped += 1;
          }
        }
      }
    }

    report.total_subscriptions = subscriptions.len();
    for record in subscriptions.values() {
      *report
        .subscriptions_by_source
        .entry(record.source.as_str().to_owned())
        .or_insert(0) += 1;
    }
    Ok(report)
  }

  // ── Internals ─────────────────────────────────────────────────────────

  /// Persist a confirmed record and write the verification through to the
  /// owning user, then build the positive decision.
  ///
  /// Upgrade-on-confirm: a confirmed record whose stored tier is not
  /// premium-equivalent is normalised to `premium` — confirmation never
  /// leaves an `active = true, tier = free` state behind.
  async fn confirm(
    &self,
    mut record: Subscription,
    evidence: Evidence,
  ) -> Result<Decision> {
    if !self.policy.tiers.is_entitled(&record.tier) {
      record.tier = Tier::premium();
    }
    record.active = true;
    record.touch();
    let record =
      self.store.put_subscription(record).await.map_err(Error::store)?;

    if let Some(email) = record.email.clone() {
      let mut user = self
        .store
        .get_user(&email)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| User::new(&email));
      user.subscription_id = Some(record.id.clone());
      user.subscription_tier = record.tier.clone();
      user.verification = Some(Verification {
        verified:    true,
        verified_at: Utc::now(),
        evidence,
      });
      user.touch();
      self.store.put_user(user).await.map_err(Error::store)?;
    }

    Ok(Decision {
      active: true,
      tier: Tier::premium(),
      features: FeatureSet::premium(self.policy.features),
      has_valid_subscription: true,
      email: record.email.clone(),
      subscription_id: Some(record.id),
    })
  }

  /// Synthesise or update the local mirror for a provider subscription
  /// discovered by email.
  ///
  /// Re-checks for an existing `(email, provider_subscription_id)` record
  /// immediately before writing so concurrent resolves update the same
  /// mirror instead of creating duplicate records for one provider
  /// subscription.
  async fn mirror_record(
    &self,
    email: &str,
    provider: &ProviderSubscription,
  ) -> Result<Subscription> {
    let existing = self
      .store
      .subscriptions_for_email(email)
      .await
      .map_err(Error::store)?;
    let mut record = existing
      .into_values()
      .find(|r| r.provider_subscription_id.as_deref() == Some(&provider.id))
      .unwrap_or_else(|| {
        let mut r = Subscription::new(
          Uuid::new_v4().to_string(),
          Source::StripeDirectFetch,
        );
        r.email = Some(email.to_owned());
        r
      });
    record.apply_provider(provider);
    Ok(record)
  }

  /// Mirror a provider subscription resolved by raw id, with no email in
  /// hand. De-duplicated by provider subscription id across the store.
  async fn mirror_unowned(
    &self,
    provider: &ProviderSubscription,
  ) -> Result<Subscription> {
    let all = self.store.all_subscriptions().await.map_err(Error::store)?;
    let mut record = all
      .into_values()
      .find(|r| r.provider_subscription_id.as_deref() == Some(&provider.id))
      .unwrap_or_else(|| {
        Subscription::new(Uuid::new_v4().to_string(), Source::StripeDirectFetch)
      });
    record.apply_provider(provider);
    Ok(record)
  }

  /// After a fully negative resolution, downgrade a stale positive cache
  /// on the user record so gates stop honouring it.
  async fn revoke_cached(&self, email: &str) -> Result<()> {
    let Some(mut user) =
      self.store.get_user(email).await.map_err(Error::store)?
    else {
      return Ok(());
    };
    let cached_premium = self.policy.tiers.is_entitled(&user.subscription_tier);
    let cached_verified =
      user.verification.as_ref().is_some_and(|v| v.verified);
    if !cached_premium && !cached_verified {
      return Ok(());
    }
    tracing::info!(email, "revoking stale cached entitlement");
    user.subscription_tier = Tier::free();
    user.verification = None;
    user.touch();
    self.store.put_user(user).await.map_err(Error::store)?;
    Ok(())
  }
}

/// Rebuild a minimal subscription record from a user's cached fields.
fn reconstruct(id: &str, user: &User) -> Subscription {
  let source = match user.verification.as_ref().map(|v| &v.evidence) {
    Some(Evidence::Provider { .. }) => Source::StripeDirectFetch,
    Some(Evidence::Local { source, .. }) => source.clone(),
    None => Source::Manual,
  };
  let mut record = Subscription::new(id, source);
  record.email = Some(user.email.clone());
  record.tier = user.subscription_tier.clone();
  record.active =
    user.active && user.verification.as_ref().is_some_and(|v| v.verified);
  if let Some(Evidence::Provider {
    provider_subscription_id,
    current_period_end,
    ..
  }) = user.verification.as_ref().map(|v| &v.evidence)
  {
    record.provider_subscription_id = Some(provider_subscription_id.clone());
    record.current_period_end = *current_period_end;
  }
  record
}

impl Subscription {
  /// Fold live provider data into this record.
  fn apply_provider(&mut self, provider: &ProviderSubscription) {
    self.active = provider.active;
    self.provider_subscription_id = Some(provider.id.clone());
    if provider.customer_id.is_some() {
      self.provider_customer_id = provider.customer_id.clone();
    }
    self.current_period_end = provider.current_period_end;
    self.trial_end = provider.trial_end;
    self.touch();
  }
}

impl Evidence {
  fn provider(p: &ProviderSubscription) -> Self {
    Evidence::Provider {
      provider_subscription_id: p.id.clone(),
      status:                   p.status.clone(),
      current_period_end:       p.current_period_end,
    }
  }
}
