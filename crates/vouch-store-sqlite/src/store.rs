//! [`SqliteStore`] — the SQLite implementation of [`EntitlementStore`].

use std::{collections::HashMap, path::Path};

use rusqlite::OptionalExtension as _;

use vouch_core::{
  store::EntitlementStore,
  subscription::Subscription,
  usage::{MonthKey, UsageRecord},
  user::User,
};

use crate::{
  Error, Result,
  encode::{
    RawSubscription, RawUsage, RawUser, encode_details, encode_dt,
    encode_opt_dt, encode_verification,
  },
  schema::SCHEMA,
};

const SUB_COLS: &str = "id, email, active, tier, source, \
   provider_subscription_id, provider_customer_id, current_period_end, \
   trial_end, notes, created_at, updated_at";

const USER_COLS: &str = "email, name, active, subscription_id, \
   subscription_tier, verification, created_at, updated_at";

fn sub_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSubscription> {
  Ok(RawSubscription {
    id:                       row.get(0)?,
    email:                    row.get(1)?,
    active:                   row.get(2)?,
    tier:                     row.get(3)?,
    source:                   row.get(4)?,
    provider_subscription_id: row.get(5)?,
    provider_customer_id:     row.get(6)?,
    current_period_end:       row.get(7)?,
    trial_end:                row.get(8)?,
    notes:                    row.get(9)?,
    created_at:               row.get(10)?,
    updated_at:               row.get(11)?,
  })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUser> {
  Ok(RawUser {
    email:             row.get(0)?,
    name:              row.get(1)?,
    active:            row.get(2)?,
    subscription_id:   row.get(3)?,
    subscription_tier: row.get(4)?,
    verification:      row.get(5)?,
    created_at:        row.get(6)?,
    updated_at:        row.get(7)?,
  })
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A vouch entitlement store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted. Writes go
/// through the serialized connection and hit the WAL before the call
/// returns, which is the durability contract callers rely on.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Test hook: remove an index row without touching the primary record,
  /// reproducing the drift the read-repair path heals.
  #[cfg(test)]
  pub(crate) async fn unindex(&self, email: &str, id: &str) -> Result<()> {
    let email = email.to_owned();
    let id = id.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM email_index WHERE email = ?1 AND subscription_id = ?2",
          rusqlite::params![email, id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── EntitlementStore impl ───────────────────────────────────────────────────

impl EntitlementStore for SqliteStore {
  type Error = Error;

  // ── Subscriptions ─────────────────────────────────────────────────────

  async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
    let id = id.to_owned();
    let raw: Option<RawSubscription> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SUB_COLS} FROM subscriptions WHERE id = ?1"),
              rusqlite::params![id],
              sub_from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSubscription::into_subscription).transpose()
  }

  async fn put_subscription(&self, record: Subscription) -> Result<Subscription> {
    let id                 = record.id.clone();
    let email              = record.email.clone();
    let active             = record.active;
    let tier               = record.tier.as_str().to_owned();
    let source             = record.source.as_str().to_owned();
    let provider_sub_id    = record.provider_subscription_id.clone();
    let provider_cust_id   = record.provider_customer_id.clone();
    let current_period_end = encode_opt_dt(record.current_period_end);
    let trial_end          = encode_opt_dt(record.trial_end);
    let notes              = record.notes.clone();
    let created_at         = encode_dt(record.created_at);
    let updated_at         = encode_dt(record.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subscriptions (
             id, email, active, tier, source,
             provider_subscription_id, provider_customer_id,
             current_period_end, trial_end, notes, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
           ON CONFLICT(id) DO UPDATE SET
             email = excluded.email,
             active = excluded.active,
             tier = excluded.tier,
             source = excluded.source,
             provider_subscription_id = excluded.provider_subscription_id,
             provider_customer_id = excluded.provider_customer_id,
             current_period_end = excluded.current_period_end,
             trial_end = excluded.trial_end,
             notes = excluded.notes,
             updated_at = excluded.updated_at",
          rusqlite::params![
            id,
            email,
            active,
            tier,
            source,
            provider_sub_id,
            provider_cust_id,
            current_period_end,
            trial_end,
            notes,
            created_at,
            updated_at,
          ],
        )?;
        if let Some(email) = &email {
          conn.execute(
            "INSERT OR IGNORE INTO email_index (email, subscription_id)
             VALUES (?1, ?2)",
            rusqlite::params![email, id],
          )?;
        }
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn delete_subscription(&self, id: &str) -> Result<()> {
    let id = id.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM email_index WHERE subscription_id = ?1",
          rusqlite::params![id],
        )?;
        conn.execute(
          "DELETE FROM subscriptions WHERE id = ?1",
          rusqlite::params![id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn all_subscriptions(&self) -> Result<HashMap<String, Subscription>> {
    let raws: Vec<RawSubscription> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare(&format!("SELECT {SUB_COLS} FROM subscriptions"))?;
        let rows = stmt
          .query_map([], sub_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut out = HashMap::with_capacity(raws.len());
    for raw in raws {
      let record = raw.into_subscription()?;
      out.insert(record.id.clone(), record);
    }
    Ok(out)
  }

  async fn subscriptions_for_email(
    &self,
    email: &str,
  ) -> Result<HashMap<String, Subscription>> {
    let email = email.to_owned();
    let raws: Vec<RawSubscription> = self
      .conn
      .call(move |conn| {
        let rows = {
          let mut stmt = conn.prepare(&format!(
            "SELECT {SUB_COLS} FROM subscriptions
             WHERE email = ?1
                OR id IN (SELECT subscription_id FROM email_index
                          WHERE email = ?1)"
          ))?;
          stmt
            .query_map(rusqlite::params![email], sub_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        // Read-repair: any record found by its email field alone gets its
        // missing index row inserted before we return.
        for raw in &rows {
          if raw.email.as_deref() == Some(email.as_str()) {
            conn.execute(
              "INSERT OR IGNORE INTO email_index (email, subscription_id)
               VALUES (?1, ?2)",
              rusqlite::params![email, raw.id],
            )?;
          }
        }
        Ok(rows)
      })
      .await?;

    let mut out = HashMap::with_capacity(raws.len());
    for raw in raws {
      let record = raw.into_subscription()?;
      out.insert(record.id.clone(), record);
    }
    Ok(out)
  }

  async fn index_ids_for_email(&self, email: &str) -> Result<Vec<String>> {
    let email = email.to_owned();
    let ids = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT subscription_id FROM email_index WHERE email = ?1",
        )?;
        let ids = stmt
          .query_map(rusqlite::params![email], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
      })
      .await?;
    Ok(ids)
  }

  async fn email_index(&self) -> Result<HashMap<String, Vec<String>>> {
    let pairs: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT email, subscription_id FROM email_index")?;
        let pairs = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
      })
      .await?;

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (email, id) in pairs {
      out.entry(email).or_default().push(id);
    }
    Ok(out)
  }

  async fn remove_index_entry(&self, email: &str, id: &str) -> Result<()> {
    let email = email.to_owned();
    let id = id.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM email_index WHERE email = ?1 AND subscription_id = ?2",
          rusqlite::params![email, id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Users ─────────────────────────────────────────────────────────────

  async fn get_user(&self, email: &str) -> Result<Option<User>> {
    let email = email.to_owned();
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLS} FROM users WHERE email = ?1"),
              rusqlite::params![email],
              user_from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawUser::into_user).transpose()
  }

  async fn put_user(&self, record: User) -> Result<User> {
    let email           = record.email.clone();
    let name            = record.name.clone();
    let active          = record.active;
    let subscription_id = record.subscription_id.clone();
    let tier            = record.subscription_tier.as_str().to_owned();
    let verification    = record
      .verification
      .as_ref()
      .map(encode_verification)
      .transpose()?;
    let created_at      = encode_dt(record.created_at);
    let updated_at      = encode_dt(record.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (
             email, name, active, subscription_id, subscription_tier,
             verification, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT(email) DO UPDATE SET
             name = excluded.name,
             active = excluded.active,
             subscription_id = excluded.subscription_id,
             subscription_tier = excluded.subscription_tier,
             verification = excluded.verification,
             updated_at = excluded.updated_at",
          rusqlite::params![
            email,
            name,
            active,
            subscription_id,
            tier,
            verification,
            created_at,
            updated_at,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn delete_user(&self, email: &str) -> Result<()> {
    let email = email.to_owned();
    self
      .conn
      .call(move |conn| {
        let sub_id: Option<String> = conn
          .query_row(
            "SELECT subscription_id FROM users WHERE email = ?1",
            rusqlite::params![email],
            |row| row.get(0),
          )
          .optional()?
          .flatten();
        conn.execute("DELETE FROM users WHERE email = ?1", rusqlite::params![email])?;
        // Explicit admin deletion cascades to the referenced subscription.
        if let Some(sub_id) = sub_id {
          conn.execute(
            "DELETE FROM email_index WHERE subscription_id = ?1",
            rusqlite::params![sub_id],
          )?;
          conn.execute(
            "DELETE FROM subscriptions WHERE id = ?1",
            rusqlite::params![sub_id],
          )?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn all_users(&self) -> Result<HashMap<String, User>> {
    let raws: Vec<RawUser> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLS} FROM users"))?;
        let rows = stmt
          .query_map([], user_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut out = HashMap::with_capacity(raws.len());
    for raw in raws {
      let record = raw.into_user()?;
      out.insert(record.email.clone(), record);
    }
    Ok(out)
  }

  // ── Usage ─────────────────────────────────────────────────────────────

  async fn get_usage(
    &self,
    identifier: &str,
    month: &MonthKey,
  ) -> Result<Option<UsageRecord>> {
    let identifier = identifier.to_owned();
    let month = month.as_str().to_owned();
    let raw: Option<RawUsage> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT identifier, month, message_count, details
               FROM usage WHERE identifier = ?1 AND month = ?2",
              rusqlite::params![identifier, month],
              |row| {
                Ok(RawUsage {
                  identifier:    row.get(0)?,
                  month:         row.get(1)?,
                  message_count: row.get(2)?,
                  details:       row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawUsage::into_record).transpose()
  }

  async fn put_usage(&self, record: UsageRecord) -> Result<UsageRecord> {
    let identifier    = record.identifier.clone();
    let month         = record.month.as_str().to_owned();
    let message_count = record.message_count;
    let details       = encode_details(&record.details)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO usage (identifier, month, message_count, details)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(identifier, month) DO UPDATE SET
             message_count = excluded.message_count,
             details = excluded.details",
          rusqlite::params![identifier, month, message_count, details],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn delete_usage(&self, identifier: &str, month: &MonthKey) -> Result<()> {
    let identifier = identifier.to_owned();
    let month = month.as_str().to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM usage WHERE identifier = ?1 AND month = ?2",
          rusqlite::params![identifier, month],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
