//! `vouch` — operator CLI for the vouch entitlement server.
//!
//! # Usage
//!
//! ```
//! vouch --url http://localhost:8080 check --email alice@example.com
//! vouch usage thread-42
//! vouch --user admin --password secret sweep
//! vouch --user admin --password secret reset thread-42
//! ```

mod client;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use client::{ApiClient, ApiConfig};
use serde::Deserialize;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vouch", about = "Operator CLI for the vouch entitlement server")]
struct Args {
  /// Path to a TOML config file (url, username, password).
  #[arg(short, long, value_name = "FILE")]
  config: Option<std::path::PathBuf>,

  /// Base URL of the vouch server (default: http://localhost:8080).
  #[arg(long, env = "VOUCH_URL")]
  url: Option<String>,

  /// Admin username, required for sweep and reset.
  #[arg(long, env = "VOUCH_USER")]
  user: Option<String>,

  /// Admin password (plaintext).
  #[arg(long, env = "VOUCH_PASSWORD")]
  password: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve entitlement for an email or a subscription id.
  Check {
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    subscription_id: Option<String>,
  },
  /// Show the current month's usage for an identifier.
  Usage { identifier: String },
  /// Run the admin reconciliation sweep.
  Sweep,
  /// Reset the current month's usage counter for an identifier.
  Reset { identifier: String },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:      String,
  #[serde(default)]
  username: String,
  #[serde(default)]
  password: String,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  // Load config file if provided.
  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  // CLI flags override config file, which overrides defaults.
  let api_config = ApiConfig {
    base_url: args
      .url
      .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
      .unwrap_or_else(|| "http://localhost:8080".to_string()),
    username: args
      .user
      .or_else(|| (!file_cfg.username.is_empty()).then(|| file_cfg.username.clone()))
      .unwrap_or_default(),
    password: args
      .password
      .or_else(|| (!file_cfg.password.is_empty()).then(|| file_cfg.password.clone()))
      .unwrap_or_default(),
  };

  let client = ApiClient::new(api_config)?;

  match args.command {
    Command::Check { email, subscription_id } => {
      let decision = match (subscription_id, email) {
        (Some(id), _) => client.check_subscription(&id).await?,
        (None, Some(email)) => client.check_email(&email).await?,
        (None, None) => bail!("pass --email or --subscription-id"),
      };
      println!("{}", serde_json::to_string_pretty(&decision)?);
    }
    Command::Usage { identifier } => {
      let usage = client.usage(&identifier).await?;
      println!("{}", serde_json::to_string_pretty(&usage)?);
    }
    Command::Sweep => {
      let report = client.sweep().await?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Reset { identifier } => {
      client.reset_usage(&identifier).await?;
      println!("usage reset for {identifier}");
    }
  }

  Ok(())
}
