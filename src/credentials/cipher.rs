//! AES-256-GCM sealing of bot keys, bound to their owning row.
//!
//! Every seal uses a fresh 12-byte IV. The additional authenticated data
//! ties a ciphertext to one `(owner_id, credential_id)` pair, so a row
//! copied onto another account fails to open even under the right key.

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::CryptoConfig;
use crate::secrets::Secrets;

/// Master key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// IV length in bytes (96-bit GCM nonce).
pub const IV_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Random bytes in a generated bot key before hex encoding.
pub const SECRET_BYTES: usize = 32;

const HKDF_SALT: &[u8] = b"bot-key-encryption";
const HKDF_INFO: &[u8] = b"bot-key-v1";

/// Cipher and key-handling failures.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The named master key variable is unset or empty.
    #[error("master key not configured: {0}")]
    MissingKey(String),

    /// Key material or key version is unusable.
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    /// A stored row names a key generation this keyring does not hold.
    #[error("no master key loaded for key_version {0}")]
    UnknownKeyVersion(i64),

    /// Tag mismatch, wrong AAD, wrong key, or malformed stored fields.
    #[error("authenticated decryption failed")]
    Authentication,

    /// The AEAD refused to seal (not reachable with valid inputs).
    #[error("encryption failed")]
    Encryption,
}

/// A plaintext bot key. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct RawSecret(String);

impl RawSecret {
    /// Wrap a plaintext key.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the key. Only for returning it to its owner or hashing it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters, safe to store and display in clear.
    pub fn last4(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        chars[chars.len().saturating_sub(4)..].iter().collect()
    }
}

impl std::fmt::Debug for RawSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// 32 bytes of AES-256 key material.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl MasterKey {
    /// Turn an operator-supplied secret into key material.
    ///
    /// A secret of exactly 32 bytes is used as-is; anything else goes
    /// through HKDF-SHA256 with fixed, versioned salt and info strings.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] for an empty secret.
    pub fn derive(secret: &str) -> Result<Self, CipherError> {
        let bytes = secret.as_bytes();
        if bytes.is_empty() {
            return Err(CipherError::InvalidKey("secret is empty".to_owned()));
        }

        let mut key = [0u8; KEY_LEN];
        if bytes.len() == KEY_LEN {
            key.copy_from_slice(bytes);
            return Ok(Self(key));
        }

        Hkdf::<Sha256>::new(Some(HKDF_SALT), bytes)
            .expand(HKDF_INFO, &mut key)
            .map_err(|e| CipherError::InvalidKey(format!("hkdf expand: {e}")))?;
        Ok(Self(key))
    }
}

/// Master keys by generation, with one current generation for sealing.
#[derive(Debug, Clone)]
pub struct Keyring {
    current: i64,
    keys: BTreeMap<i64, MasterKey>,
}

impl Keyring {
    /// Keyring with a single current generation.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] for a non-positive version or empty secret.
    pub fn new(version: i64, secret: &str) -> Result<Self, CipherError> {
        if version <= 0 {
            return Err(CipherError::InvalidKey(format!(
                "key_version must be positive, got {version}"
            )));
        }
        let mut keys = BTreeMap::new();
        keys.insert(version, MasterKey::derive(secret)?);
        Ok(Self {
            current: version,
            keys,
        })
    }

    /// Add a retired generation used only for opening older rows.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] if the version is already loaded.
    pub fn with_previous(mut self, version: i64, secret: &str) -> Result<Self, CipherError> {
        if self.keys.contains_key(&version) {
            return Err(CipherError::InvalidKey(format!(
                "key_version {version} configured twice"
            )));
        }
        self.keys.insert(version, MasterKey::derive(secret)?);
        Ok(self)
    }

    /// Build the keyring named by `[crypto]`, resolving values from `secrets`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::MissingKey`] naming the first unset variable.
    pub fn from_config(config: &CryptoConfig, secrets: &Secrets) -> Result<Self, CipherError> {
        let current = secrets
            .get(&config.key_env)
            .ok_or_else(|| CipherError::MissingKey(config.key_env.clone()))?;
        let mut keyring = Self::new(config.key_version, &current)?;

        for previous in &config.previous_keys {
            let secret = secrets
                .get(&previous.key_env)
                .ok_or_else(|| CipherError::MissingKey(previous.key_env.clone()))?;
            keyring = keyring.with_previous(previous.version, &secret)?;
        }

        tracing::debug!(
            current = keyring.current,
            loaded = keyring.keys.len(),
            "master keyring loaded"
        );
        Ok(keyring)
    }

    /// Generation used for new seals.
    pub fn current_version(&self) -> i64 {
        self.current
    }

    fn key(&self, version: i64) -> Result<&MasterKey, CipherError> {
        self.keys
            .get(&version)
            .ok_or(CipherError::UnknownKeyVersion(version))
    }
}

/// Storable output of sealing a bot key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    /// Base64 ciphertext without the tag.
    pub ciphertext: String,
    /// Base64 12-byte IV.
    pub iv: String,
    /// Base64 16-byte GCM tag.
    pub auth_tag: String,
    /// Keyring generation that sealed this value.
    pub key_version: i64,
}

/// Seals and opens bot keys with the loaded keyring.
#[derive(Debug, Clone)]
pub struct CredentialCipher {
    keyring: Keyring,
}

impl CredentialCipher {
    /// Cipher over a loaded keyring.
    pub fn new(keyring: Keyring) -> Self {
        Self { keyring }
    }

    /// Generation stamped on new seals.
    pub fn current_version(&self) -> i64 {
        self.keyring.current_version()
    }

    /// Seal `secret` for the row `(owner_id, credential_id)` under the current key.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encryption`] if the AEAD rejects the input.
    pub fn encrypt(
        &self,
        secret: &RawSecret,
        owner_id: &str,
        credential_id: &str,
    ) -> Result<SealedSecret, CipherError> {
        let version = self.keyring.current_version();
        let key = self.keyring.key(version)?;

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let aad = associated_data(owner_id, credential_id);
        let cipher = Aes256Gcm::new((&key.0).into());
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: secret.expose().as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CipherError::Encryption)?;

        let tag_start = sealed
            .len()
            .checked_sub(TAG_LEN)
            .ok_or(CipherError::Encryption)?;
        let (ciphertext, tag) = sealed.split_at(tag_start);

        Ok(SealedSecret {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(tag),
            key_version: version,
        })
    }

    /// Open a sealed key for the row `(owner_id, credential_id)`.
    ///
    /// The key generation is taken from `sealed.key_version`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Authentication`] on any verification failure and
    /// [`CipherError::UnknownKeyVersion`] if that generation is not loaded.
    pub fn decrypt(
        &self,
        sealed: &SealedSecret,
        owner_id: &str,
        credential_id: &str,
    ) -> Result<RawSecret, CipherError> {
        let key = self.keyring.key(sealed.key_version)?;

        let iv = decode_field(&sealed.iv)?;
        let tag = decode_field(&sealed.auth_tag)?;
        let ciphertext = decode_field(&sealed.ciphertext)?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(CipherError::Authentication);
        }

        let mut combined = Vec::with_capacity(ciphertext.len().saturating_add(TAG_LEN));
        combined.extend_from_slice(&ciphertext);
        combined.extend_from_slice(&tag);

        let aad = associated_data(owner_id, credential_id);
        let cipher = Aes256Gcm::new((&key.0).into());
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &combined,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(plaintext)
            .map(RawSecret)
            .map_err(|_| CipherError::Authentication)
    }
}

/// Hex SHA-256 of a bot key: the only lookup key on the ingestion path.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Fresh bot key: 32 random bytes, hex encoded (64 chars).
pub fn generate_secret() -> RawSecret {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    RawSecret(hex::encode(bytes))
}

/// Length-prefixed so `("a:b", "c")` and `("a", "b:c")` never collide.
fn associated_data(owner_id: &str, credential_id: &str) -> String {
    format!("{}:{owner_id}:{credential_id}", owner_id.len())
}

fn decode_field(value: &str) -> Result<Vec<u8>, CipherError> {
    BASE64
        .decode(value)
        .map_err(|_| CipherError::Authentication)
}
