//! Per-user, per-calendar-month usage records.
//!
//! Records are keyed by `(identifier, month)`, so a new month starts from a
//! fresh zero record with no explicit rollover step.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of detail entries kept per record — a ring buffer, not a
/// full log.
pub const DETAIL_CAPACITY: usize = 50;

/// Maximum characters of message text kept in a detail excerpt.
const EXCERPT_CHARS: usize = 120;

// ─── MonthKey ────────────────────────────────────────────────────────────────

/// A calendar month in UTC, `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthKey(String);

impl MonthKey {
  /// The current UTC month.
  pub fn current() -> Self { Self::from_date(Utc::now()) }

  pub fn from_date(at: DateTime<Utc>) -> Self {
    Self(format!("{:04}-{:02}", at.year(), at.month()))
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// First day of the following month — when this month's counter resets.
  /// `None` only for a malformed key.
  pub fn reset_date(&self) -> Option<NaiveDate> {
    let (y, m) = self.0.split_once('-')?;
    let y: i32 = y.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    let (ny, nm) = if m >= 12 { (y + 1, 1) } else { (y, m + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
  }
}

/// Reconstruct a key from its stored string form. Assumed well-formed;
/// [`MonthKey::reset_date`] tolerates malformed keys.
impl From<String> for MonthKey {
  fn from(s: String) -> Self { Self(s) }
}

impl std::fmt::Display for MonthKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// One metered request, excerpted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageDetail {
  pub at:       DateTime<Utc>,
  pub excerpt:  String,
  pub endpoint: String,
  pub method:   String,
}

impl UsageDetail {
  /// Build a detail entry, truncating the message on a char boundary.
  pub fn new(message: &str, endpoint: &str, method: &str) -> Self {
    Self {
      at:       Utc::now(),
      excerpt:  message.chars().take(EXCERPT_CHARS).collect(),
      endpoint: endpoint.to_owned(),
      method:   method.to_owned(),
    }
  }
}

/// Usage for one `(identifier, month)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
  pub identifier:    String,
  pub month:         MonthKey,
  /// Monotonically non-decreasing within the month.
  pub message_count: u32,
  /// Most recent [`DETAIL_CAPACITY`] entries, oldest first.
  pub details:       Vec<UsageDetail>,
}

impl UsageRecord {
  /// A zero-valued record — what callers see before the first increment.
  pub fn empty(identifier: impl Into<String>, month: MonthKey) -> Self {
    Self {
      identifier:    identifier.into(),
      month,
      message_count: 0,
      details:       Vec::new(),
    }
  }

  /// Count one message and append its detail, truncating the ring buffer.
  pub fn record(&mut self, detail: UsageDetail) {
    self.message_count += 1;
    self.details.push(detail);
    if self.details.len() > DETAIL_CAPACITY {
      let overflow = self.details.len() - DETAIL_CAPACITY;
      self.details.drain(..overflow);
    }
  }
}
