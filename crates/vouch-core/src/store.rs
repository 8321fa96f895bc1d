//! The `EntitlementStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `vouch-store-sqlite`).
//! Higher layers (the Reconciliation Engine, the Usage Meter, `vouch-api`)
//! depend on this abstraction, not on any concrete backend.
//!
//! Durability contract: every mutating method persists synchronously before
//! returning. A successful return means the write survives a process crash,
//! so a decision already answered to a caller is never lost.
//!
//! All methods return `Send` futures so the trait can be used in
//! multi-threaded async runtimes (e.g. tokio with `axum`).

use std::{collections::HashMap, future::Future};

use crate::{
  subscription::Subscription,
  usage::{MonthKey, UsageRecord},
  user::User,
};

pub trait EntitlementStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Subscriptions ─────────────────────────────────────────────────────

  /// Retrieve a subscription by id. Returns `None` if not found.
  fn get_subscription<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Subscription>, Self::Error>> + Send + 'a;

  /// Upsert a subscription. When the record carries an email, its id is
  /// also added to that email's index entry.
  fn put_subscription(
    &self,
    record: Subscription,
  ) -> impl Future<Output = Result<Subscription, Self::Error>> + Send + '_;

  /// Delete a subscription, removing it from the email index as well.
  fn delete_subscription<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn all_subscriptions(
    &self,
  ) -> impl Future<Output = Result<HashMap<String, Subscription>, Self::Error>> + Send + '_;

  /// All subscriptions associated with `email`.
  ///
  /// Dual-path: the union of ids in the email index and records whose
  /// stored `email` field matches but whose id is missing from the index.
  /// The latter triggers a read-repair that inserts the missing index row —
  /// the index and the primary records are updated by independent writers
  /// elsewhere and can drift, so the index is never assumed authoritative.
  fn subscriptions_for_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<HashMap<String, Subscription>, Self::Error>> + Send + 'a;

  /// Raw index entry for `email` — no read-repair, no record fetch. Used by
  /// the admin sweep and by tests of the healing behaviour.
  fn index_ids_for_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  /// Full snapshot of the email index.
  fn email_index(
    &self,
  ) -> impl Future<Output = Result<HashMap<String, Vec<String>>, Self::Error>> + Send + '_;

  /// Drop a single index row. Used by the sweep for entries that reference
  /// a record that no longer exists and cannot be reconstructed.
  fn remove_index_entry<'a>(
    &'a self,
    email: &'a str,
    id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Users ─────────────────────────────────────────────────────────────

  fn get_user<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + 'a;

  fn put_user(
    &self,
    record: User,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  /// Delete a user and cascade to their referenced subscription record.
  fn delete_user<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn all_users(
    &self,
  ) -> impl Future<Output = Result<HashMap<String, User>, Self::Error>> + Send + '_;

  // ── Usage ─────────────────────────────────────────────────────────────

  fn get_usage<'a>(
    &'a self,
    identifier: &'a str,
    month: &'a MonthKey,
  ) -> impl Future<Output = Result<Option<UsageRecord>, Self::Error>> + Send + 'a;

  fn put_usage(
    &self,
    record: UsageRecord,
  ) -> impl Future<Output = Result<UsageRecord, Self::Error>> + Send + '_;

  fn delete_usage<'a>(
    &'a self,
    identifier: &'a str,
    month: &'a MonthKey,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
