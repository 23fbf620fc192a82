//! Bot key lifecycle: issue, rotate, reveal, authenticate, rekey.
//!
//! [`CredentialManager`] is the only writer of key rows and audit entries.
//! A key is returned to a caller only after the write that makes it valid
//! has committed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cipher::{generate_secret, hash_secret, CredentialCipher, RawSecret, SealedSecret};
use super::store::{
    AuditAction, AuditEntry, CredentialRecord, CredentialStatus, CredentialStore, StoreError,
};
use crate::db::now_timestamp;
use crate::error::BotKeyError;
use crate::ratelimit::{RateDecision, RateLimiter};

/// Bound on read-then-write rounds for one issuance. A round only fails
/// when another writer committed in between.
const MAX_WRITE_ATTEMPTS: u32 = 8;

/// A freshly issued or rotated key. The only time the full key leaves storage
/// other than through [`CredentialManager::reveal`].
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// The plaintext key.
    pub secret: RawSecret,
    /// Its last four characters.
    pub last4: String,
    /// [`AuditAction::Issue`] for a first key, [`AuditAction::Regenerate`] otherwise.
    pub action: AuditAction,
}

/// A stored key decrypted for its owner.
#[derive(Debug, Clone)]
pub struct RevealedKey {
    /// The plaintext key.
    pub secret: RawSecret,
    /// Its last four characters.
    pub last4: String,
}

/// Orchestrates key generation, sealing, persistence and audit.
pub struct CredentialManager {
    cipher: Arc<CredentialCipher>,
    store: Arc<dyn CredentialStore>,
    reveal_limiter: Arc<dyn RateLimiter>,
}

impl CredentialManager {
    /// Create a manager over the given cipher, store and reveal limiter.
    pub fn new(
        cipher: Arc<CredentialCipher>,
        store: Arc<dyn CredentialStore>,
        reveal_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            cipher,
            store,
            reveal_limiter,
        }
    }

    /// Issue a first key for `owner_id`, or replace the existing one.
    ///
    /// The row id survives rotation. The old key stops authenticating as
    /// soon as this returns. Overlapping calls for one account serialize:
    /// each commits a complete row with exactly one audit entry, and a call
    /// that loses the race re-reads the row and rotates again.
    ///
    /// # Errors
    ///
    /// Returns [`BotKeyError::Storage`] if the lookup or write fails, in which
    /// case no key is returned, and [`BotKeyError::Config`] if sealing fails.
    pub async fn issue_or_rotate(&self, owner_id: &str) -> Result<IssuedKey, BotKeyError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let existing = self.store.find_by_owner(owner_id).await?;
            let secret = generate_secret();
            let now = now_timestamp();

            let (record, action, committed) = match existing {
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    let record = self.seal(&secret, owner_id, id, now.clone(), &now)?;
                    let audit = audit_entry(&record, AuditAction::Issue, &now);
                    let committed = self.store.insert_with_audit(&record, &audit).await?;
                    (record, AuditAction::Issue, committed)
                }
                Some(current) => {
                    let record = self.seal(
                        &secret,
                        owner_id,
                        current.id.clone(),
                        current.created_at.clone(),
                        &now,
                    )?;
                    let audit = audit_entry(&record, AuditAction::Regenerate, &now);
                    let committed = self
                        .store
                        .replace_with_audit(&current, &record, &audit)
                        .await?;
                    (record, AuditAction::Regenerate, committed)
                }
            };

            if !committed {
                debug!(owner_id, attempt, "bot key row changed before write, retrying");
                continue;
            }

            info!(
                owner_id,
                credential_id = %record.id,
                last4 = %record.last4,
                key_version = record.key_version,
                action = action.as_str(),
                "bot key written"
            );

            return Ok(IssuedKey {
                secret,
                last4: record.last4,
                action,
            });
        }

        warn!(owner_id, attempts = MAX_WRITE_ATTEMPTS, "bot key write kept conflicting");
        Err(StoreError::Conflict {
            owner_id: owner_id.to_owned(),
            attempts: MAX_WRITE_ATTEMPTS,
        }
        .into())
    }

    /// Decrypt and return the owner's current key.
    ///
    /// The reveal limiter is consulted first; a denied request performs no
    /// lookup, no decryption and no audit write.
    ///
    /// # Errors
    ///
    /// Returns [`BotKeyError::RateLimited`] when over the reveal limit,
    /// [`BotKeyError::NotFound`] when no key exists, and
    /// [`BotKeyError::Authentication`] if the stored ciphertext fails to verify.
    pub async fn reveal(&self, owner_id: &str) -> Result<RevealedKey, BotKeyError> {
        if let RateDecision::Denied { retry_after } = self.reveal_limiter.check(owner_id).await {
            warn!(owner_id, retry_secs = retry_after.as_secs(), "bot key reveal rate limited");
            return Err(BotKeyError::RateLimited { retry_after });
        }

        let row = self
            .store
            .find_by_owner(owner_id)
            .await?
            .ok_or(BotKeyError::NotFound)?;

        let secret = self
            .cipher
            .decrypt(&sealed_from(&row), owner_id, &row.id)
            .map_err(|e| {
                warn!(owner_id, credential_id = %row.id, error = %e, "stored bot key failed to open");
                BotKeyError::from(e)
            })?;

        self.store
            .append_audit(&AuditEntry {
                owner_id: owner_id.to_owned(),
                credential_id: row.id.clone(),
                action: AuditAction::Reveal,
                created_at: now_timestamp(),
            })
            .await?;

        info!(owner_id, credential_id = %row.id, last4 = %row.last4, "bot key revealed");

        Ok(RevealedKey {
            secret,
            last4: row.last4,
        })
    }

    /// Resolve a presented key to its owner by hash lookup. Never decrypts.
    ///
    /// # Errors
    ///
    /// Returns [`BotKeyError::Storage`] if the lookup fails.
    pub async fn authenticate(&self, presented: &str) -> Result<Option<String>, BotKeyError> {
        if presented.is_empty() {
            return Ok(None);
        }
        let row = self.store.find_by_key_hash(&hash_secret(presented)).await?;
        if row.is_none() {
            debug!("presented bot key matched no stored hash");
        }
        Ok(row.map(|r| r.owner_id))
    }

    /// Display-safe metadata for the owner's key.
    ///
    /// # Errors
    ///
    /// Returns [`BotKeyError::NotFound`] when no key exists.
    pub async fn status(&self, owner_id: &str) -> Result<CredentialStatus, BotKeyError> {
        self.store
            .status(owner_id)
            .await?
            .ok_or(BotKeyError::NotFound)
    }

    /// Re-seal every row not under the current master key generation.
    ///
    /// The plaintext, hash, last4 and id of each key are unchanged, so
    /// outstanding bot keys keep working. A row rotated after it was listed
    /// is left alone. Returns the number of rows rewritten.
    ///
    /// # Errors
    ///
    /// Stops at the first row that cannot be opened or written.
    pub async fn rekey(&self) -> Result<usize, BotKeyError> {
        let current = self.cipher.current_version();
        let stale = self.store.list_stale(current).await?;
        let mut rewritten = 0usize;

        for row in stale {
            let secret = self.cipher.decrypt(&sealed_from(&row), &row.owner_id, &row.id)?;
            let sealed = self.cipher.encrypt(&secret, &row.owner_id, &row.id)?;
            let now = now_timestamp();

            let record = CredentialRecord {
                ciphertext: sealed.ciphertext,
                iv: sealed.iv,
                auth_tag: sealed.auth_tag,
                key_version: sealed.key_version,
                updated_at: now.clone(),
                ..row.clone()
            };
            let audit = audit_entry(&record, AuditAction::Rekey, &now);

            if !self.store.replace_with_audit(&row, &record, &audit).await? {
                info!(
                    owner_id = %row.owner_id,
                    credential_id = %row.id,
                    "bot key changed since listing, rekey skipped"
                );
                continue;
            }

            info!(
                owner_id = %record.owner_id,
                credential_id = %record.id,
                from_version = row.key_version,
                to_version = record.key_version,
                "bot key rekeyed"
            );
            rewritten = rewritten.saturating_add(1);
        }

        Ok(rewritten)
    }

    fn seal(
        &self,
        secret: &RawSecret,
        owner_id: &str,
        credential_id: String,
        created_at: String,
        now: &str,
    ) -> Result<CredentialRecord, BotKeyError> {
        let sealed = self.cipher.encrypt(secret, owner_id, &credential_id)?;
        Ok(CredentialRecord {
            id: credential_id,
            owner_id: owner_id.to_owned(),
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            auth_tag: sealed.auth_tag,
            key_hash: hash_secret(secret.expose()),
            last4: secret.last4(),
            key_version: sealed.key_version,
            created_at,
            updated_at: now.to_owned(),
        })
    }
}

fn audit_entry(record: &CredentialRecord, action: AuditAction, now: &str) -> AuditEntry {
    AuditEntry {
        owner_id: record.owner_id.clone(),
        credential_id: record.id.clone(),
        action,
        created_at: now.to_owned(),
    }
}

fn sealed_from(row: &CredentialRecord) -> SealedSecret {
    SealedSecret {
        ciphertext: row.ciphertext.clone(),
        iv: row.iv.clone(),
        auth_tag: row.auth_tag.clone(),
        key_version: row.key_version,
    }
}
