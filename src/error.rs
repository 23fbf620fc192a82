//! Error taxonomy shared by the lifecycle, ingestion, and HTTP layers.
//!
//! Display strings are caller-safe: they never contain a bot key, and
//! authentication failures do not say which check failed.

use std::time::Duration;

use crate::credentials::cipher::CipherError;
use crate::credentials::store::StoreError;

/// Errors surfaced by bot key operations.
#[derive(Debug, thiserror::Error)]
pub enum BotKeyError {
    /// Master key missing or malformed. Fatal until the operator fixes config.
    #[error("configuration error: {0}")]
    Config(String),

    /// Presented key unknown, or stored ciphertext failed verification.
    #[error("invalid credential")]
    Authentication,

    /// A limiter denied the request.
    #[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Time until the current window closes.
        retry_after: Duration,
    },

    /// The account has no bot key yet.
    #[error("no bot key found")]
    NotFound,

    /// The record store failed; the operation was aborted.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Malformed submission payload or link policy violation.
    #[error("{0}")]
    Validation(String),
}

impl From<CipherError> for BotKeyError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Authentication => Self::Authentication,
            CipherError::MissingKey(_)
            | CipherError::InvalidKey(_)
            | CipherError::UnknownKeyVersion(_)
            | CipherError::Encryption => Self::Config(err.to_string()),
        }
    }
}
