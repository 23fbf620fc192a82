//! Per-account bot API keys.
//!
//! - [`cipher`]: sealing, hashing and generation of keys
//! - [`store`]: the record store seam and its SQLite implementation
//! - [`lifecycle`]: issue, rotate, reveal, authenticate and rekey

pub mod cipher;
pub mod lifecycle;
pub mod store;

pub use cipher::{CredentialCipher, Keyring, RawSecret};
pub use lifecycle::{CredentialManager, IssuedKey, RevealedKey};
pub use store::{AuditAction, AuditEntry, CredentialRecord, CredentialStatus, CredentialStore};
