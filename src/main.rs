//! Clawcon CLI entry point.
//!
//! `serve` runs the HTTP service. `issue`, `status`, `rekey` and
//! `grant-session` are one-shot operator commands against the same database.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use clawcon::config::{load_config_or_default, Config};
use clawcon::db::Database;
use clawcon::identity::SessionTokens;
use clawcon::secrets::{load_secrets_or_env, Secrets};
use clawcon::server::{self, AppState, SAVE_KEY_WARNING};

/// Clawcon: bot API key service for the Claw Con submission board.
#[derive(Parser)]
#[command(name = "clawcon", version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the `.env` file holding master keys.
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve,
    /// Issue a bot key for an account, or rotate its existing key.
    Issue {
        /// Account id.
        owner: String,
    },
    /// Show display-safe metadata for an account's key.
    Status {
        /// Account id.
        owner: String,
    },
    /// Re-seal every stored key under the current master key generation.
    Rekey,
    /// Mint a session token for an account.
    GrantSession {
        /// Account id.
        owner: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config_or_default(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Serve => handle_serve(&config, &cli.env_file).await,
        Command::Issue { owner } => {
            clawcon::logging::init_cli();
            handle_issue(&config, &cli.env_file, &owner).await
        }
        Command::Status { owner } => {
            clawcon::logging::init_cli();
            handle_status(&config, &cli.env_file, &owner).await
        }
        Command::Rekey => {
            clawcon::logging::init_cli();
            handle_rekey(&config, &cli.env_file).await
        }
        Command::GrantSession { owner } => {
            clawcon::logging::init_cli();
            handle_grant_session(&config, &owner).await
        }
    }
}

/// Run the HTTP server until ctrl-c.
async fn handle_serve(config: &Config, env_file: &Path) -> anyhow::Result<()> {
    let _logging_guard = clawcon::logging::init_production(&config.logging)?;

    let (db, state) = open_state(config, env_file).await?;

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        key_version = config.crypto.key_version,
        "clawcon starting"
    );

    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
    })
    .await?;

    db.close().await;
    Ok(())
}

/// Issue or rotate a key and print it once.
async fn handle_issue(config: &Config, env_file: &Path, owner: &str) -> anyhow::Result<()> {
    let (db, state) = open_state(config, env_file).await?;
    let issued = state
        .credentials
        .issue_or_rotate(owner)
        .await
        .with_context(|| format!("failed to issue bot key for {owner}"))?;

    println!("{}", issued.secret.expose());
    eprintln!("{} key ending in {}. {SAVE_KEY_WARNING}", issued.action.as_str(), issued.last4);
    db.close().await;
    Ok(())
}

/// Print key metadata as JSON.
async fn handle_status(config: &Config, env_file: &Path, owner: &str) -> anyhow::Result<()> {
    let (db, state) = open_state(config, env_file).await?;
    let status = state
        .credentials
        .status(owner)
        .await
        .with_context(|| format!("failed to read bot key status for {owner}"))?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    db.close().await;
    Ok(())
}

/// Re-seal stale rows and report how many changed.
async fn handle_rekey(config: &Config, env_file: &Path) -> anyhow::Result<()> {
    let (db, state) = open_state(config, env_file).await?;
    let rewritten = state
        .credentials
        .rekey()
        .await
        .context("failed to rekey stored bot keys")?;

    println!("rekeyed {rewritten} bot key(s) to version {}", config.crypto.key_version);
    db.close().await;
    Ok(())
}

/// Mint a session token and print it once.
async fn handle_grant_session(config: &Config, owner: &str) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).await?;
    let sessions = SessionTokens::new(db.clone(), config.sessions.ttl_hours);
    let token = sessions
        .grant(owner)
        .await
        .with_context(|| format!("failed to grant session for {owner}"))?;

    println!("{}", token.expose());
    db.close().await;
    Ok(())
}

async fn open_state(config: &Config, env_file: &Path) -> anyhow::Result<(Database, AppState)> {
    let secrets: Secrets = load_secrets_or_env(env_file)
        .with_context(|| format!("failed to load {}", env_file.display()))?;
    let db = Database::open(&config.database.path).await?;
    let state = AppState::build(config, &secrets, &db).context("failed to initialise services")?;
    Ok((db, state))
}
