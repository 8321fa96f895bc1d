//! Handler for `POST /api/messages` — the usage-gated message endpoint.
//!
//! Flow: gate check, then downstream processing, then commit of the usage
//! charge. The order is load-bearing: a request rejected by the gate never
//! reaches downstream, and a downstream failure drops the charge token so
//! the user is not billed for an answer they never got.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vouch_core::{
  gateway::ProviderGateway,
  meter::{ExemptReason, GateDecision},
  store::EntitlementStore,
};

use crate::{AppState, downstream::Downstream, error::Error};

const ENDPOINT: &str = "/api/messages";

#[derive(Debug, Deserialize)]
pub struct MessageBody {
  /// Opaque conversation/thread identifier the meter keys on.
  pub user_identifier: String,
  /// Known email for this user, when the caller has one.
  pub email:   Option<String>,
  pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UsageSummary {
  pub current: u32,
  pub limit:   u32,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
  pub reply: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exempt: Option<ExemptReason>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub usage:  Option<UsageSummary>,
}

/// `POST /api/messages`
pub async fn create<S, G, D>(
  State(state): State<AppState<S, G, D>>,
  Json(body): Json<MessageBody>,
) -> Result<Json<MessageResponse>, Error>
where
  S: EntitlementStore + 'static,
  G: ProviderGateway + 'static,
  D: Downstream + 'static,
{
  let decision = state
    .gate
    .check(
      &body.user_identifier,
      body.email.as_deref(),
      &body.message,
      ENDPOINT,
      "POST",
    )
    .await?;

  match decision {
    GateDecision::Denied(limit) => Err(Error::LimitExceeded(limit)),
    GateDecision::Exempt(reason) => {
      let reply = state
        .downstream
        .handle(&body.user_identifier, &body.message)
        .await
        .map_err(|e| Error::Downstream(e.message))?;
      Ok(Json(MessageResponse { reply, exempt: Some(reason), usage: None }))
    }
    GateDecision::Allowed(charge) => {
      let reply = state
        .downstream
        .handle(&body.user_identifier, &body.message)
        .await
        .map_err(|e| Error::Downstream(e.message))?;
      let record = state.gate.commit(charge).await?;
      Ok(Json(MessageResponse {
        reply,
        exempt: None,
        usage: Some(UsageSummary {
          current: record.message_count,
          limit:   state.gate.policy().free_limit,
        }),
      }))
    }
  }
}
