//! Master-key secret resolution from the process environment and `.env`.
//!
//! `config.toml` names the variables; the values live here. Values are
//! never printed: `Debug` lists key names only.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

/// Secret values loaded from a `.env` file, with process env taking priority.
#[derive(Clone, Default)]
pub struct Secrets {
    vars: BTreeMap<String, String>,
    use_process_env: bool,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .field("use_process_env", &self.use_process_env)
            .finish()
    }
}

impl Secrets {
    /// Build secrets from a fixed map. The process environment is not consulted.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars,
            use_process_env: false,
        }
    }

    /// Secrets backed only by the process environment.
    pub fn from_process_env() -> Self {
        Self {
            vars: BTreeMap::new(),
            use_process_env: true,
        }
    }

    /// Returns a non-empty secret value for a key, if present.
    ///
    /// The process environment wins over the `.env` file when enabled.
    pub fn get(&self, key: &str) -> Option<String> {
        if self.use_process_env {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        self.vars
            .get(key)
            .filter(|value| !value.is_empty())
            .cloned()
    }
}

/// Load secrets from a specific `.env` path, layered under the process env.
///
/// # Errors
///
/// Returns an error if the file does not exist, permissions are too broad,
/// or parsing fails.
pub fn load_secrets(path: &Path) -> anyhow::Result<Secrets> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "secrets file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read secrets at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in secrets file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    debug!(path = %path.display(), count = vars.len(), "loaded secrets file");
    Ok(Secrets {
        vars,
        use_process_env: true,
    })
}

/// Load secrets from `path` when it exists, otherwise from the process env only.
///
/// # Errors
///
/// Returns an error if the file exists but is unreadable or too permissive.
pub fn load_secrets_or_env(path: &Path) -> anyhow::Result<Secrets> {
    if path.exists() {
        load_secrets(path)
    } else {
        debug!(path = %path.display(), "no secrets file, using process environment");
        Ok(Secrets::from_process_env())
    }
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect secrets file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "secrets file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
