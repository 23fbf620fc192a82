//! Fixed-window rate limiting for the reveal and ingestion paths.
//!
//! Callers depend on the [`RateLimiter`] trait so the in-process
//! [`FixedWindowLimiter`] can be replaced by a shared counter store when
//! the service runs as more than one instance. Counters are process-local
//! and reset on restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Map size above which expired windows are swept during `check`.
const SWEEP_THRESHOLD: usize = 1024;

/// Maximum actions per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Allowed actions per window.
    pub max: u32,
    /// Window length, measured from the first action of the window.
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Policy with explicit limits.
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    /// Three reveals per hour.
    pub fn reveal_default() -> Self {
        Self::new(3, Duration::from_secs(3600))
    }

    /// Twenty submissions per hour.
    pub fn ingest_default() -> Self {
        Self::new(20, Duration::from_secs(3600))
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Action permitted and counted.
    Allowed {
        /// Actions left in the current window.
        remaining: u32,
    },
    /// Action refused; nothing was counted.
    Denied {
        /// Time until the window closes.
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the action may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Capability to admit or refuse one action for a key.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one action for `key` if the window allows it.
    async fn check(&self, key: &str) -> RateDecision;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// In-memory fixed-window limiter keyed by string.
///
/// Uses a sync [`Mutex`] since the critical section is very short (no awaits).
/// The whole read-modify-write happens under the lock, so concurrent checks
/// for one key can never both see the last free slot.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    /// Create a limiter enforcing `policy`.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// The enforced policy.
    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Check `key` against the window state at `now`.
    ///
    /// A key with no window, or whose window has closed, opens a new one
    /// with a count of one. Otherwise the count grows until `max`; further
    /// checks are denied without touching the count or the window end.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "rate limiter lock poisoned, denying");
                return RateDecision::Denied {
                    retry_after: self.policy.window,
                };
            }
        };

        if self.policy.max == 0 {
            return RateDecision::Denied {
                retry_after: self.policy.window,
            };
        }

        if windows.len() > SWEEP_THRESHOLD {
            let before = windows.len();
            windows.retain(|_, w| now < w.reset_at);
            debug!(
                swept = before.saturating_sub(windows.len()),
                "expired rate limit windows swept"
            );
        }

        match windows.get_mut(key) {
            Some(window) if now < window.reset_at => {
                if window.count < self.policy.max {
                    window.count = window.count.saturating_add(1);
                    RateDecision::Allowed {
                        remaining: self.policy.max.saturating_sub(window.count),
                    }
                } else {
                    RateDecision::Denied {
                        retry_after: window.reset_at.saturating_duration_since(now),
                    }
                }
            }
            _ => {
                let reset_at = now.checked_add(self.policy.window).unwrap_or(now);
                windows.insert(key.to_owned(), Window { count: 1, reset_at });
                RateDecision::Allowed {
                    remaining: self.policy.max.saturating_sub(1),
                }
            }
        }
    }

    /// Drop windows that closed before `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        match self.windows.lock() {
            Ok(mut windows) => {
                let before = windows.len();
                windows.retain(|_, w| now < w.reset_at);
                before.saturating_sub(windows.len())
            }
            Err(_) => 0,
        }
    }

    /// Number of keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }
}
