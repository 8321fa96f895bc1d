//! vouch server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens an
//! in-process SQLite store, and serves the entitlement and metering API
//! over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth_password_hash` in config.toml:
//!
//! ```
//! cargo run -p vouch-api --bin vouch-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vouch_api::{AppState, ServerConfig, auth::AuthConfig, downstream::WebhookRelay};
use vouch_core::{
  meter::{GatePolicy, UsageGate},
  resolve::{ReconcilePolicy, Reconciler},
  subscription::TierPolicy,
};
use vouch_store_sqlite::SqliteStore;
use vouch_stripe::{StripeConfig, StripeGateway};

const DOWNSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(author, version, about = "vouch entitlement server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("VOUCH"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  // Open SQLite store.
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  // Stripe gateway.
  let mut stripe_cfg = StripeConfig::new(server_cfg.stripe_secret_key.clone());
  if let Some(base_url) = &server_cfg.stripe_base_url {
    stripe_cfg.base_url = base_url.clone();
  }
  let gateway = Arc::new(
    StripeGateway::new(stripe_cfg).context("failed to build Stripe client")?,
  );

  // Policies, with config overrides.
  let tiers = match &server_cfg.entitled_tiers {
    Some(entitled) => TierPolicy { entitled: entitled.clone() },
    None => TierPolicy::default(),
  };
  let reconcile_policy = ReconcilePolicy {
    tiers: tiers.clone(),
    ..ReconcilePolicy::default()
  };
  let mut gate_policy = GatePolicy { tiers, ..GatePolicy::default() };
  if let Some(limit) = server_cfg.free_message_limit {
    gate_policy.free_limit = limit;
  }

  let reconciler = Arc::new(Reconciler::new(
    Arc::clone(&store),
    gateway,
    reconcile_policy,
  ));
  let gate = Arc::new(UsageGate::new(Arc::clone(&store), gate_policy));

  let downstream = Arc::new(
    WebhookRelay::new(server_cfg.downstream_webhook.clone(), DOWNSTREAM_TIMEOUT)
      .context("failed to build downstream client")?,
  );

  // Build application state.
  let state = AppState {
    store,
    reconciler,
    gate,
    downstream,
    auth: Arc::new(AuthConfig {
      username:      server_cfg.auth_username.clone(),
      password_hash: server_cfg.auth_password_hash.clone(),
    }),
    config: Arc::new(server_cfg.clone()),
  };

  let app = vouch_api::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
