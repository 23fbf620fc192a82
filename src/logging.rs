//! Tracing setup for the daemon and the one-shot commands.
//!
//! `serve` writes JSON lines to a daily-rotated file under `[logging] dir`
//! and a readable copy to stderr ([`init_production`]). Every other command
//! logs to stderr only, at `warn` unless `RUST_LOG` says otherwise
//! ([`init_cli`]), so keys printed on stdout are never mixed with log lines.
//!
//! Bot keys are never passed to a log macro; callers log `last4` and ids only.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// File name prefix of the rotated JSON log; the date is appended.
pub const LOG_FILE_PREFIX: &str = "clawcon.log";

/// Directives appended to every filter. sqlx reports each statement at
/// `info`, which would bury the key lifecycle events.
const QUIET_DIRECTIVES: &[&str] = &["sqlx::query=warn"];

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Filter from `RUST_LOG` when set, else from `default_level`, with the
/// quiet directives applied on top.
///
/// # Errors
///
/// Returns an error if `default_level` is not a valid filter directive.
pub fn build_filter(default_level: &str) -> anyhow::Result<EnvFilter> {
    let mut filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level {default_level:?}"))?,
    };
    for directive in QUIET_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialise logging for `serve`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created, the level is
/// invalid, or a global subscriber is already installed.
pub fn init_production(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("failed to create logs directory {}", config.dir.display()))?;

    let filter = build_filter(&config.level)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise stderr-only logging for one-shot commands. Safe to call twice.
pub fn init_cli() {
    let filter = build_filter("warn").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
