//! Session identity for the account-facing key routes.
//!
//! The key management routes act on "the current account". That account is
//! resolved from a bearer session token through [`SessionAuthenticator`].
//! [`SessionTokens`] is the SQLite-backed implementation: tokens are random,
//! stored only as SHA-256 hashes, and expire after a configured lifetime.

use async_trait::async_trait;
use sqlx::Row;
use tracing::info;

use crate::credentials::cipher::{generate_secret, hash_secret, RawSecret};
use crate::credentials::store::StoreError;
use crate::db::{format_timestamp, now_timestamp, Database};

/// Resolves a presented session token to an account id.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// The owning account, or `None` for unknown or expired tokens.
    async fn resolve(&self, token: &str) -> Result<Option<String>, StoreError>;
}

/// Hashed, expiring session tokens in the `sessions` table.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    db: Database,
    ttl: chrono::Duration,
}

impl SessionTokens {
    /// Tokens valid for `ttl_hours` after they are granted.
    pub fn new(db: Database, ttl_hours: i64) -> Self {
        Self {
            db,
            ttl: chrono::Duration::try_hours(ttl_hours).unwrap_or_else(chrono::Duration::zero),
        }
    }

    /// Mint a token for `owner_id`. The plaintext is returned once.
    ///
    /// Expired tokens are deleted first.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge or insert fails.
    pub async fn grant(&self, owner_id: &str) -> Result<RawSecret, StoreError> {
        let purged = self.purge_expired().await?;
        let token = generate_secret();
        let now = chrono::Utc::now();
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(now);

        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(hash_secret(token.expose()))
        .bind(owner_id)
        .bind(format_timestamp(now))
        .bind(format_timestamp(expires_at))
        .execute(self.db.pool())
        .await?;

        info!(
            owner_id,
            expires_at = %format_timestamp(expires_at),
            purged,
            "session granted"
        );
        Ok(token)
    }

    /// Delete every expired token. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
            .bind(now_timestamp())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionAuthenticator for SessionTokens {
    async fn resolve(&self, token: &str) -> Result<Option<String>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query("SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_at > ?2")
            .bind(hash_secret(token))
            .bind(now_timestamp())
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|r| r.try_get::<String, _>("user_id"))
            .transpose()
            .map_err(StoreError::from)
    }
}
