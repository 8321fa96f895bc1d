//! Handler for `POST /api/entitlement/check`.
//!
//! Body: `{"email": "…"}` or `{"subscription_id": "…"}`. When both are
//! present the subscription id wins — it is the more specific claim.

use axum::{Json, extract::State};
use serde::Deserialize;
use vouch_core::{
  gateway::ProviderGateway, resolve::Decision, store::EntitlementStore,
};

use crate::{AppState, downstream::Downstream, error::Error};

#[derive(Debug, Deserialize)]
pub struct CheckBody {
  pub email:           Option<String>,
  pub subscription_id: Option<String>,
}

/// `POST /api/entitlement/check`
pub async fn check<S, G, D>(
  State(state): State<AppState<S, G, D>>,
  Json(body): Json<CheckBody>,
) -> Result<Json<Decision>, Error>
where
  S: EntitlementStore + 'static,
  G: ProviderGateway + 'static,
  D: Downstream + 'static,
{
  let result = match (&body.subscription_id, &body.email) {
    (Some(id), _) => state.reconciler.resolve_by_id(id).await,
    (None, Some(email)) => state.reconciler.resolve_by_email(email).await,
    (None, None) => {
      return Err(Error::BadRequest(
        "either email or subscription_id is required".to_owned(),
      ));
    }
  };

  match result {
    Ok(decision) => Ok(Json(decision)),
    // Attach the upgrade link so a conversational client can relay it.
    Err(vouch_core::Error::SubscriptionNotFound(id)) => Err(Error::NotFound {
      message:          format!("subscription {id} not found"),
      subscription_url: Some(state.config.subscription_url.clone()),
    }),
    Err(e) => Err(e.into()),
  }
}
