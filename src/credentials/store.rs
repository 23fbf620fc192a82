//! Record store for bot keys and their audit trail.
//!
//! [`CredentialStore`] is the seam between the lifecycle manager and the
//! database. The SQLite implementation lives on [`Database`]. Every key row
//! write commits together with its audit row, and only if the row still
//! looks the way the caller last read it.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::Row;

use crate::db::Database;

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected or failed the query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored enum column holds an unknown value.
    #[error("invalid {field} value in database: {value}")]
    InvalidEnum {
        /// Column name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A stored JSON column failed to decode.
    #[error("invalid json in {field}: {message}")]
    InvalidJson {
        /// Column name.
        field: &'static str,
        /// Decoder message.
        message: String,
    },

    /// Concurrent writers kept changing the row between read and write.
    #[error("bot key write for {owner_id} still conflicting after {attempts} attempts")]
    Conflict {
        /// Account whose row was contended.
        owner_id: String,
        /// Writes tried.
        attempts: u32,
    },
}

/// Sensitive action recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// First key issued for an account.
    Issue,
    /// Stored key decrypted and shown to its owner.
    Reveal,
    /// Existing key replaced by a new one.
    Regenerate,
    /// Existing key re-sealed under the current master key generation.
    Rekey,
}

impl AuditAction {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Reveal => "reveal",
            Self::Regenerate => "regenerate",
            Self::Rekey => "rekey",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised action.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "issue" => Ok(Self::Issue),
            "reveal" => Ok(Self::Reveal),
            "regenerate" => Ok(Self::Regenerate),
            "rekey" => Ok(Self::Rekey),
            other => Err(StoreError::InvalidEnum {
                field: "action",
                value: other.to_owned(),
            }),
        }
    }
}

/// One `bot_keys` row. Holds no plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Stable id, kept across rotations.
    pub id: String,
    /// Owning account.
    pub owner_id: String,
    /// Base64 ciphertext.
    pub ciphertext: String,
    /// Base64 IV.
    pub iv: String,
    /// Base64 GCM tag.
    pub auth_tag: String,
    /// Hex SHA-256 of the key.
    pub key_hash: String,
    /// Last four characters of the key.
    pub last4: String,
    /// Master key generation that sealed the row.
    pub key_version: i64,
    /// First issuance time.
    pub created_at: String,
    /// Last rotation or rekey time.
    pub updated_at: String,
}

/// One append-only `bot_key_audit` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// Account the action was performed for.
    pub owner_id: String,
    /// Key the action touched.
    pub credential_id: String,
    /// What happened.
    pub action: AuditAction,
    /// When it happened.
    pub created_at: String,
}

/// Display-safe key metadata from the `bot_keys_public` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    /// Last four characters of the current key.
    pub last4: String,
    /// Master key generation of the stored ciphertext.
    pub key_version: i64,
    /// First issuance time.
    pub created_at: String,
    /// Last rotation time.
    pub updated_at: String,
}

/// Persistence operations the lifecycle manager depends on.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Key row for an account, if any.
    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Key row whose `key_hash` matches, if any.
    async fn find_by_key_hash(&self, key_hash: &str)
        -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert the account's first key row and append `audit`, atomically.
    ///
    /// Returns `false`, writing nothing, if the account already has a row.
    async fn insert_with_audit(
        &self,
        record: &CredentialRecord,
        audit: &AuditEntry,
    ) -> Result<bool, StoreError>;

    /// Overwrite the sealed fields of `current` with those of `next` and
    /// append `audit`, atomically. `id`, owner and `created_at` never change.
    ///
    /// Returns `false`, writing nothing, if the stored row no longer matches
    /// `current` on id, `key_hash` and `key_version`.
    async fn replace_with_audit(
        &self,
        current: &CredentialRecord,
        next: &CredentialRecord,
        audit: &AuditEntry,
    ) -> Result<bool, StoreError>;

    /// Append one audit entry.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Display-safe metadata for an account's key.
    async fn status(&self, owner_id: &str) -> Result<Option<CredentialStatus>, StoreError>;

    /// Rows sealed under any generation other than `current_version`.
    async fn list_stale(&self, current_version: i64)
        -> Result<Vec<CredentialRecord>, StoreError>;

    /// Audit trail for an account, oldest first.
    async fn audit_log(&self, owner_id: &str) -> Result<Vec<AuditEntry>, StoreError>;
}

const SELECT_RECORD: &str = "SELECT id, user_id, ciphertext, iv, tag, key_hash, last4, \
     key_version, created_at, updated_at FROM bot_keys";

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CredentialRecord, StoreError> {
    Ok(CredentialRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("user_id")?,
        ciphertext: row.try_get("ciphertext")?,
        iv: row.try_get("iv")?,
        auth_tag: row.try_get("tag")?,
        key_hash: row.try_get("key_hash")?,
        last4: row.try_get("last4")?,
        key_version: row.try_get("key_version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn insert_audit<'e, E>(executor: E, entry: &AuditEntry) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO bot_key_audit (user_id, bot_key_id, action, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&entry.owner_id)
    .bind(&entry.credential_id)
    .bind(entry.action.as_str())
    .bind(&entry.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for Database {
    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_RECORD} WHERE user_id = ?1"))
            .bind(owner_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_RECORD} WHERE key_hash = ?1"))
            .bind(key_hash)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert_with_audit(
        &self,
        record: &CredentialRecord,
        audit: &AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO bot_keys \
             (id, user_id, ciphertext, iv, tag, key_hash, last4, key_version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.ciphertext)
        .bind(&record.iv)
        .bind(&record.auth_tag)
        .bind(&record.key_hash)
        .bind(&record.last4)
        .bind(record.key_version)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn replace_with_audit(
        &self,
        current: &CredentialRecord,
        next: &CredentialRecord,
        audit: &AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await?;

        let replaced = sqlx::query(
            "UPDATE bot_keys SET \
                 ciphertext = ?1, iv = ?2, tag = ?3, key_hash = ?4, last4 = ?5, \
                 key_version = ?6, updated_at = ?7 \
             WHERE id = ?8 AND user_id = ?9 AND key_hash = ?10 AND key_version = ?11",
        )
        .bind(&next.ciphertext)
        .bind(&next.iv)
        .bind(&next.auth_tag)
        .bind(&next.key_hash)
        .bind(&next.last4)
        .bind(next.key_version)
        .bind(&next.updated_at)
        .bind(&current.id)
        .bind(&current.owner_id)
        .bind(&current.key_hash)
        .bind(current.key_version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if replaced == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        insert_audit(self.pool(), entry).await
    }

    async fn status(&self, owner_id: &str) -> Result<Option<CredentialStatus>, StoreError> {
        let row = sqlx::query(
            "SELECT last4, key_version, created_at, updated_at \
             FROM bot_keys_public WHERE user_id = ?1",
        )
        .bind(owner_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| {
            Ok(CredentialStatus {
                last4: row.try_get("last4")?,
                key_version: row.try_get("key_version")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn list_stale(
        &self,
        current_version: i64,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_RECORD} WHERE key_version != ?1 ORDER BY created_at"
        ))
        .bind(current_version)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn audit_log(&self, owner_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, bot_key_id, action, created_at \
             FROM bot_key_audit WHERE user_id = ?1 ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let action: String = row.try_get("action")?;
                Ok(AuditEntry {
                    owner_id: row.try_get("user_id")?,
                    credential_id: row.try_get("bot_key_id")?,
                    action: AuditAction::parse(&action)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
