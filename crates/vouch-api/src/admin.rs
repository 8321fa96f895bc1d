//! Handlers for the Basic-auth admin routes.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use vouch_core::{
  gateway::ProviderGateway, resolve::SweepReport, store::EntitlementStore,
};

use crate::{
  AppState, auth::Authenticated, downstream::Downstream, error::Error,
};

/// `POST /api/admin/sweep` — reconcile the email index against the
/// subscription records and report what was recovered or dropped.
pub async fn sweep<S, G, D>(
  _auth: Authenticated,
  State(state): State<AppState<S, G, D>>,
) -> Result<Json<SweepReport>, Error>
where
  S: EntitlementStore + 'static,
  G: ProviderGateway + 'static,
  D: Downstream + 'static,
{
  let report = state.reconciler.sweep().await?;
  tracing::info!(
    recovered = report.recovered,
    dropped = report.dropped,
    total = report.total_subscriptions,
    "admin sweep complete"
  );
  Ok(Json(report))
}

/// `POST /api/admin/usage/{identifier}/reset` — zero the current month.
pub async fn reset_usage<S, G, D>(
  _auth: Authenticated,
  State(state): State<AppState<S, G, D>>,
  Path(identifier): Path<String>,
) -> Result<StatusCode, Error>
where
  S: EntitlementStore + 'static,
  G: ProviderGateway + 'static,
  D: Downstream + 'static,
{
  state.gate.meter().reset(&identifier).await?;
  tracing::info!(identifier = %identifier, "usage counter reset");
  Ok(StatusCode::NO_CONTENT)
}
