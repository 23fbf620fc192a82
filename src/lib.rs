//! Clawcon: bot API keys for the Claw Con submission board.
//!
//! Each account holds at most one bot key. Keys are sealed with AES-256-GCM
//! bound to their owner and row, looked up by SHA-256 hash on ingestion, and
//! revealed to their owner under a per-account rate limit. Bot submissions
//! arrive through a webhook, authenticated by key and sanitized before they
//! are stored.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod links;
pub mod logging;
pub mod ratelimit;
pub mod secrets;
pub mod server;
