//! Validation of untrusted links arriving with bot submissions.
//!
//! A link survives only if it parses, uses `https`, carries no userinfo,
//! and (when an allow-list is configured) points at an allowed host or
//! one of its subdomains.

use serde::Deserialize;
use url::Url;

/// What an ingestion does with links that fail validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPolicy {
    /// Discard invalid links and keep the rest.
    #[default]
    DropInvalid,
    /// Reject the whole submission if any link is invalid.
    RejectPayload,
}

/// Result of sanitizing every candidate link in a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedLinks {
    /// Normalized links that passed, in input order.
    pub accepted: Vec<String>,
    /// How many candidates were discarded.
    pub rejected: usize,
}

/// Stateless link validator with an optional host allow-list.
#[derive(Debug, Clone, Default)]
pub struct LinkSanitizer {
    allowed_hosts: Vec<String>,
}

impl LinkSanitizer {
    /// Sanitizer restricted to `allowed_hosts`; an empty list allows any host.
    pub fn new(allowed_hosts: &[String]) -> Self {
        let allowed_hosts = allowed_hosts
            .iter()
            .map(|h| normalize_host(h.trim()))
            .filter(|h| !h.is_empty())
            .collect();
        Self { allowed_hosts }
    }

    /// Validate one link, returning its normalized form.
    pub fn sanitize(&self, input: &str) -> Option<String> {
        let url = Url::parse(input.trim()).ok()?;

        if url.scheme() != "https" {
            return None;
        }
        if !url.username().is_empty() || url.password().is_some() {
            return None;
        }

        let host = url.host_str()?;
        if !self.host_allowed(host) {
            return None;
        }

        Some(url.to_string())
    }

    /// Validate every candidate independently.
    pub fn sanitize_all<S: AsRef<str>>(&self, inputs: &[S]) -> SanitizedLinks {
        let mut out = SanitizedLinks::default();
        for input in inputs {
            match self.sanitize(input.as_ref()) {
                Some(link) => out.accepted.push(link),
                None => out.rejected = out.rejected.saturating_add(1),
            }
        }
        out
    }

    fn host_allowed(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        let host = normalize_host(host);
        self.allowed_hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

fn normalize_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    let lower = lower.trim_end_matches('.');
    lower.strip_prefix("www.").unwrap_or(lower).to_owned()
}
