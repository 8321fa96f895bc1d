//! Handler for `GET /api/usage/{identifier}`.

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::NaiveDate;
use serde::Serialize;
use vouch_core::{
  gateway::ProviderGateway, store::EntitlementStore, usage::UsageRecord,
};

use crate::{AppState, downstream::Downstream, error::Error};

#[derive(Debug, Serialize)]
pub struct UsageResponse {
  #[serde(flatten)]
  pub record:     UsageRecord,
  pub limit:      u32,
  pub remaining:  u32,
  pub reset_date: Option<NaiveDate>,
}

/// `GET /api/usage/{identifier}` — current-month usage, zeroes if none.
pub async fn get_one<S, G, D>(
  State(state): State<AppState<S, G, D>>,
  Path(identifier): Path<String>,
) -> Result<Json<UsageResponse>, Error>
where
  S: EntitlementStore + 'static,
  G: ProviderGateway + 'static,
  D: Downstream + 'static,
{
  let record = state.gate.meter().monthly_usage(&identifier).await?;
  let limit = state.gate.policy().free_limit;
  let remaining = limit.saturating_sub(record.message_count);
  let reset_date = record.month.reset_date();
  Ok(Json(UsageResponse { record, limit, remaining, reset_date }))
}
