//! Router-level tests: real SQLite store (in-memory), scripted gateway,
//! deterministic downstream doubles.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand_core::OsRng;
use serde_json::{Value, json};
use tower::ServiceExt as _;
use vouch_core::{
  gateway::{
    CustomerSubscriptions, GatewayError, ProviderGateway, ProviderSubscription,
  },
  meter::{GatePolicy, UsageGate},
  resolve::{ReconcilePolicy, Reconciler},
  store::EntitlementStore,
  subscription::{Source, Subscription, Tier},
  usage::{UsageDetail, UsageRecord},
  user::User,
};
use vouch_store_sqlite::SqliteStore;

use crate::{
  AppState, ServerConfig,
  auth::AuthConfig,
  downstream::{Downstream, DownstreamError},
  router,
};

// ─── Doubles ─────────────────────────────────────────────────────────────────

/// Gateway double: answers only what is scripted, errors otherwise.
#[derive(Default)]
struct StubGateway {
  verify:   HashMap<String, ProviderSubscription>,
  by_email: HashMap<String, Vec<ProviderSubscription>>,
}

impl ProviderGateway for StubGateway {
  async fn verify_subscription(
    &self,
    provider_subscription_id: &str,
  ) -> Result<ProviderSubscription, GatewayError> {
    self
      .verify
      .get(provider_subscription_id)
      .cloned()
      .ok_or_else(|| GatewayError::new("no scripted response"))
  }

  async fn list_by_customer(
    &self,
    _customer_id: &str,
  ) -> Result<Vec<ProviderSubscription>, GatewayError> {
    Err(GatewayError::new("no scripted response"))
  }

  async fn list_by_email(
    &self,
    email: &str,
  ) -> Result<CustomerSubscriptions, GatewayError> {
    match self.by_email.get(email) {
      Some(subs) => Ok(CustomerSubscriptions {
        customer_id:   Some("cus_stub".to_owned()),
        subscriptions: subs.clone(),
      }),
      None => Err(GatewayError::new("no scripted response")),
    }
  }

  async fn list_all(
    &self,
    _status: Option<&str>,
    _page_limit: u32,
  ) -> Result<Vec<ProviderSubscription>, GatewayError> {
    Err(GatewayError::new("no scripted response"))
  }
}

/// Downstream double that always answers.
struct StaticDownstream;

impl Downstream for StaticDownstream {
  async fn handle(
    &self,
    _identifier: &str,
    message: &str,
  ) -> Result<Value, DownstreamError> {
    Ok(json!({ "reply": format!("ack: {message}") }))
  }
}

/// Downstream double that always fails.
struct FailingDownstream;

impl Downstream for FailingDownstream {
  async fn handle(
    &self,
    _identifier: &str,
    _message: &str,
  ) -> Result<Value, DownstreamError> {
    Err(DownstreamError::new("worker unavailable"))
  }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

const SUBSCRIPTION_URL: &str = "https://example.com/subscribe";

async fn make_state<D: Downstream>(
  downstream: D,
) -> AppState<SqliteStore, StubGateway, D> {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default()
    .hash_password(b"secret", &salt)
    .unwrap()
    .to_string();

  let gateway = Arc::new(StubGateway::default());
  let reconciler = Arc::new(Reconciler::new(
    Arc::clone(&store),
    gateway,
    ReconcilePolicy::default(),
  ));
  let gate =
    Arc::new(UsageGate::new(Arc::clone(&store), GatePolicy::default()));

  AppState {
    store,
    reconciler,
    gate,
    downstream: Arc::new(downstream),
    auth: Arc::new(AuthConfig {
      username:      "admin".to_owned(),
      password_hash: hash.clone(),
    }),
    config: Arc::new(ServerConfig {
      host:               "127.0.0.1".to_owned(),
      port:               8080,
      store_path:         PathBuf::from(":memory:"),
      subscription_url:   SUBSCRIPTION_URL.to_owned(),
      stripe_secret_key:  "sk_test".to_owned(),
      stripe_base_url:    None,
      downstream_webhook: None,
      auth_username:      "admin".to_owned(),
      auth_password_hash: hash,
      free_message_limit: None,
      entitled_tiers:     None,
    }),
  }
}

fn auth_header() -> String {
  format!("Basic {}", B64.encode("admin:secret"))
}

async fn request<S, G, D>(
  state: AppState<S, G, D>,
  method: &str,
  uri: &str,
  auth: Option<&str>,
  body: Option<Value>,
) -> (StatusCode, Value)
where
  S: EntitlementStore + 'static,
  G: ProviderGateway + 'static,
  D: Downstream + 'static,
{
  let mut builder = Request::builder().method(method).uri(uri);
  if let Some(a) = auth {
    builder = builder.header(header::AUTHORIZATION, a);
  }
  let req = match body {
    Some(v) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(v.to_string()))
      .unwrap(),
    None => builder.body(Body::empty()).unwrap(),
  };

  let resp = router(state).oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes =
    axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let value = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, value)
}

fn manual_grant(id: &str, email: &str) -> Subscription {
  let mut sub = Subscription::new(id, Source::Manual);
  sub.email = Some(email.to_owned());
  sub.active = true;
  sub.tier = Tier::new("manual_premium");
  sub
}

async fn seed_usage(store: &SqliteStore, identifier: &str, count: u32) {
  let mut record = UsageRecord::empty(
    identifier,
    vouch_core::usage::MonthKey::current(),
  );
  for i in 0..count {
    record.record(UsageDetail::new(
      &format!("m{i}"),
      "/api/messages",
      "POST",
    ));
  }
  store.put_usage(record).await.unwrap();
}

// ─── Entitlement check ───────────────────────────────────────────────────────

#[tokio::test]
async fn check_requires_email_or_subscription_id() {
  let state = make_state(StaticDownstream).await;
  let (status, body) = request(
    state,
    "POST",
    "/api/entitlement/check",
    None,
    Some(json!({})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("required"));
}

#[tokio::test]
async fn check_with_local_manual_grant_is_active() {
  let state = make_state(StaticDownstream).await;
  state
    .store
    .put_subscription(manual_grant("sub-1", "alice@example.com"))
    .await
    .unwrap();

  let (status, body) = request(
    state,
    "POST",
    "/api/entitlement/check",
    None,
    Some(json!({ "email": "alice@example.com" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["active"], json!(true));
  assert_eq!(body["tier"], json!("premium"));
  assert_eq!(body["has_valid_subscription"], json!(true));
  assert_eq!(body["features"]["can_search"], json!(true));
}

#[tokio::test]
async fn check_unknown_email_is_inactive() {
  let state = make_state(StaticDownstream).await;
  let (status, body) = request(
    state,
    "POST",
    "/api/entitlement/check",
    None,
    Some(json!({ "email": "nobody@example.com" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["active"], json!(false));
  assert_eq!(body["features"]["can_search"], json!(false));
}

#[tokio::test]
async fn check_unknown_subscription_id_is_404_with_upgrade_link() {
  let state = make_state(StaticDownstream).await;
  let (status, body) = request(
    state,
    "POST",
    "/api/entitlement/check",
    None,
    Some(json!({ "subscription_id": "sub-missing" })),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["subscription_url"], json!(SUBSCRIPTION_URL));
}

// ─── Messages & metering ─────────────────────────────────────────────────────

#[tokio::test]
async fn messages_count_toward_the_monthly_limit() {
  let state = make_state(StaticDownstream).await;

  let (status, body) = request(
    state.clone(),
    "POST",
    "/api/messages",
    None,
    Some(json!({ "user_identifier": "thread-1", "message": "find leads" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["usage"]["current"], json!(1));
  assert_eq!(body["usage"]["limit"], json!(5));
  assert!(body["reply"]["reply"].as_str().unwrap().contains("find leads"));

  let (status, body) =
    request(state, "GET", "/api/usage/thread-1", None, None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["message_count"], json!(1));
  assert_eq!(body["remaining"], json!(4));
}

#[tokio::test]
async fn messages_denied_after_limit() {
  let state = make_state(StaticDownstream).await;
  seed_usage(&state.store, "thread-2", 5).await;

  let (status, body) = request(
    state.clone(),
    "POST",
    "/api/messages",
    None,
    Some(json!({ "user_identifier": "thread-2", "message": "find leads" })),
  )
  .await;
  assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
  assert_eq!(body["error"], json!("Monthly limit exceeded"));
  assert_eq!(body["usage"]["current"], json!(5));
  assert_eq!(body["usage"]["limit"], json!(5));

  // A denial never consumes allowance.
  let (_, body) =
    request(state, "GET", "/api/usage/thread-2", None, None).await;
  assert_eq!(body["message_count"], json!(5));
}

#[tokio::test]
async fn exempt_topic_passes_at_limit_without_counting() {
  let state = make_state(StaticDownstream).await;
  seed_usage(&state.store, "thread-3", 5).await;

  let (status, body) = request(
    state.clone(),
    "POST",
    "/api/messages",
    None,
    Some(json!({
      "user_identifier": "thread-3",
      "message": "what is your pricing?",
    })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["exempt"], json!("exempt_topic"));

  let (_, body) =
    request(state, "GET", "/api/usage/thread-3", None, None).await;
  assert_eq!(body["message_count"], json!(5));
}

#[tokio::test]
async fn premium_inquiry_passes_over_limit() {
  let state = make_state(StaticDownstream).await;
  seed_usage(&state.store, "thread-4", 5).await;

  let (status, body) = request(
    state,
    "POST",
    "/api/messages",
    None,
    Some(json!({
      "user_identifier": "thread-4",
      "message": "I want to upgrade my account",
    })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["exempt"], json!("premium_inquiry"));
}

#[tokio::test]
async fn downstream_failure_leaves_usage_unchanged() {
  let state = make_state(FailingDownstream).await;

  let (status, _) = request(
    state.clone(),
    "POST",
    "/api/messages",
    None,
    Some(json!({ "user_identifier": "thread-5", "message": "find leads" })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_GATEWAY);

  let (_, body) =
    request(state, "GET", "/api/usage/thread-5", None, None).await;
  assert_eq!(body["message_count"], json!(0));
}

#[tokio::test]
async fn cached_premium_user_skips_metering() {
  let state = make_state(StaticDownstream).await;
  let mut user = User::new("bob@example.com");
  user.subscription_tier = Tier::premium();
  state.store.put_user(user).await.unwrap();
  seed_usage(&state.store, "bob@example.com", 5).await;

  let (status, body) = request(
    state,
    "POST",
    "/api/messages",
    None,
    Some(json!({
      "user_identifier": "bob@example.com",
      "message": "find leads",
    })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["exempt"], json!("premium"));
}

// ─── Admin routes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_requires_auth() {
  let state = make_state(StaticDownstream).await;
  let (status, _) =
    request(state, "POST", "/api/admin/sweep", None, None).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sweep_reports_totals() {
  let state = make_state(StaticDownstream).await;
  state
    .store
    .put_subscription(manual_grant("sub-9", "carol@example.com"))
    .await
    .unwrap();

  let auth = auth_header();
  let (status, body) = request(
    state,
    "POST",
    "/api/admin/sweep",
    Some(&auth),
    None,
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total_subscriptions"], json!(1));
  assert_eq!(body["recovered"], json!(0));
  assert_eq!(body["subscriptions_by_source"]["manual"], json!(1));
}

#[tokio::test]
async fn reset_requires_auth() {
  let state = make_state(StaticDownstream).await;
  let (status, _) = request(
    state,
    "POST",
    "/api/admin/usage/thread-6/reset",
    None,
    None,
  )
  .await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reset_clears_current_month() {
  let state = make_state(StaticDownstream).await;
  seed_usage(&state.store, "thread-7", 3).await;

  let auth = auth_header();
  let (status, _) = request(
    state.clone(),
    "POST",
    "/api/admin/usage/thread-7/reset",
    Some(&auth),
    None,
  )
  .await;
  assert_eq!(status, StatusCode::NO_CONTENT);

  let (_, body) =
    request(state, "GET", "/api/usage/thread-7", None, None).await;
  assert_eq!(body["message_count"], json!(0));
}
