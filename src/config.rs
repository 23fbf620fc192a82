//! Configuration loading and validation.
//!
//! `config.toml` holds only non-secret settings. Master key material is
//! referenced by environment variable name and resolved through
//! [`crate::secrets::Secrets`], never read from this file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::links::LinkPolicy;
use crate::ratelimit::RateLimitPolicy;

/// Top-level service configuration.
///
/// Every section carries serde defaults, so an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// SQLite database location.
    pub database: DatabaseConfig,

    /// Master key references and the current key generation.
    pub crypto: CryptoConfig,

    /// Reveal and ingestion rate limits.
    pub limits: LimitsConfig,

    /// Link validation rules for ingested submissions.
    pub links: LinksConfig,

    /// Session token lifetime.
    pub sessions: SessionsConfig,

    /// Log output settings for `serve`.
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file. Created on first open.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("clawcon.db"),
        }
    }
}

/// Master key references.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Environment variable holding the current master secret.
    pub key_env: String,

    /// Generation number stamped on rows encrypted with the current secret.
    pub key_version: i64,

    /// Older generations still needed to decrypt rows not yet rekeyed.
    pub previous_keys: Vec<PreviousKey>,
}

/// A retired master key generation.
#[derive(Debug, Clone, Deserialize)]
pub struct PreviousKey {
    /// Generation number stored on rows encrypted under this key.
    pub version: i64,

    /// Environment variable holding this generation's secret.
    pub key_env: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
            key_version: 1,
            previous_keys: Vec::new(),
        }
    }
}

/// Rate limits for the reveal and ingestion paths.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Reveals per account per window.
    #[serde(default = "default_reveal_limit")]
    pub reveal: WindowLimit,

    /// Submissions per bot key per window.
    #[serde(default = "default_ingest_limit")]
    pub ingest: WindowLimit,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            reveal: default_reveal_limit(),
            ingest: default_ingest_limit(),
        }
    }
}

/// A fixed-window limit expressed in config units. A table that sets a
/// limit must name `max`; `window_secs` defaults to one hour.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowLimit {
    /// Maximum allowed actions per window.
    pub max: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl WindowLimit {
    /// Convert to the limiter's policy type.
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.max, Duration::from_secs(self.window_secs))
    }
}

impl From<RateLimitPolicy> for WindowLimit {
    fn from(policy: RateLimitPolicy) -> Self {
        Self {
            max: policy.max,
            window_secs: policy.window.as_secs(),
        }
    }
}

fn default_reveal_limit() -> WindowLimit {
    RateLimitPolicy::reveal_default().into()
}

fn default_ingest_limit() -> WindowLimit {
    RateLimitPolicy::ingest_default().into()
}

fn default_window_secs() -> u64 {
    3600
}

/// Link validation rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    /// What to do when a candidate link fails validation.
    pub policy: LinkPolicy,

    /// Reject the submission when no link survives validation.
    pub require_at_least_one: bool,

    /// Hosts (and their subdomains) links may point at. Empty allows any host.
    pub allowed_hosts: Vec<String>,

    /// Maximum number of candidate links accepted in one payload.
    pub max_links: usize,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            policy: LinkPolicy::DropInvalid,
            require_at_least_one: false,
            allowed_hosts: Vec::new(),
            max_links: 16,
        }
    }
}

/// Session token settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Lifetime of a granted session token in hours.
    pub ttl_hours: i64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 720,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the daily-rotated JSON log.
    pub dir: PathBuf,

    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            level: "info".to_owned(),
        }
    }
}

fn default_key_env() -> String {
    "BOT_KEY_ENC_KEY".to_owned()
}

/// Load the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Load the config if the file exists, falling back to defaults otherwise.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_or_default(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        return Ok(Config::default());
    }
    load_config(path)
}
