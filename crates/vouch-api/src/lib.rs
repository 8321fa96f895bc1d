//! HTTP surface for the entitlement and metering service.
//!
//! Exposes an axum [`Router`] generic over the store backend, the payment
//! provider gateway, and the downstream message processor. Everything
//! stateful lives in [`AppState`]; the router owns no I/O of its own.
//!
//! | Method | Path | Auth |
//! |--------|------|------|
//! | `POST` | `/api/entitlement/check` | none |
//! | `POST` | `/api/messages` | none |
//! | `GET`  | `/api/usage/{identifier}` | none |
//! | `POST` | `/api/admin/sweep` | Basic |
//! | `POST` | `/api/admin/usage/{identifier}/reset` | Basic |

pub mod admin;
pub mod auth;
pub mod downstream;
pub mod entitlement;
pub mod error;
pub mod messages;
pub mod usage;

#[cfg(test)] mod tests;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use vouch_core::{
  gateway::ProviderGateway, meter::UsageGate, resolve::Reconciler,
  store::EntitlementStore,
};

use auth::AuthConfig;
use downstream::Downstream;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,

  /// Where a user without a valid subscription is sent to get one.
  pub subscription_url: String,

  pub stripe_secret_key: String,
  #[serde(default)]
  pub stripe_base_url:   Option<String>,

  /// Webhook that answers gated messages. Echo mode when absent.
  #[serde(default)]
  pub downstream_webhook: Option<String>,

  pub auth_username:      String,
  pub auth_password_hash: String,

  /// Overrides for the default metering and tier policies.
  #[serde(default)]
  pub free_message_limit: Option<u32>,
  #[serde(default)]
  pub entitled_tiers:     Option<Vec<String>>,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, G, D> {
  pub store:      Arc<S>,
  pub reconciler: Arc<Reconciler<S, G>>,
  pub gate:       Arc<UsageGate<S>>,
  pub downstream: Arc<D>,
  pub auth:       Arc<AuthConfig>,
  pub config:     Arc<ServerConfig>,
}

// Manual impl: a derive would demand Clone of S, G, and D themselves.
impl<S, G, D> Clone for AppState<S, G, D> {
  fn clone(&self) -> Self {
    Self {
      store:      Arc::clone(&self.store),
      reconciler: Arc::clone(&self.reconciler),
      gate:       Arc::clone(&self.gate),
      downstream: Arc::clone(&self.downstream),
      auth:       Arc::clone(&self.auth),
      config:     Arc::clone(&self.config),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the service router over `state`.
pub fn router<S, G, D>(state: AppState<S, G, D>) -> Router
where
  S: EntitlementStore + 'static,
  G: ProviderGateway + 'static,
  D: Downstream + 'static,
{
  Router::new()
    .route("/api/entitlement/check", post(entitlement::check::<S, G, D>))
    .route("/api/messages", post(messages::create::<S, G, D>))
    .route("/api/usage/{identifier}", get(usage::get_one::<S, G, D>))
    .route("/api/admin/sweep", post(admin::sweep::<S, G, D>))
    .route(
      "/api/admin/usage/{identifier}/reset",
      post(admin::reset_usage::<S, G, D>),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
