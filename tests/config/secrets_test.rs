//! Coverage for `.env` secret loading and permission checks.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clawcon::secrets::{load_secrets, load_secrets_or_env, Secrets};

fn write_env(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join(".env");
    fs::write(&path, contents).expect("should write env file");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .expect("should set permissions");
    }
    path
}

#[test]
fn loads_env_file_values() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = write_env(
        tmp.path(),
        "CLAWCON_TEST_FILE_ONLY_KEY=file-secret\nCLAWCON_TEST_EMPTY=\n",
    );

    let secrets = load_secrets(&path).expect("secrets should load");
    assert_eq!(
        secrets.get("CLAWCON_TEST_FILE_ONLY_KEY").as_deref(),
        Some("file-secret")
    );
    assert_eq!(secrets.get("CLAWCON_TEST_EMPTY"), None);
}

#[cfg(unix)]
#[test]
fn rejects_world_readable_env_file() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = write_env(tmp.path(), "BOT_KEY_ENC_KEY=secret\n");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("should set permissions");

    let err = load_secrets(&path).expect_err("0644 must be refused");
    assert!(err.to_string().contains("0600"));
}

#[test]
fn missing_env_file_uses_process_env() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join(".env");

    assert!(load_secrets(&path).is_err());
    let secrets = load_secrets_or_env(&path).expect("process env fallback");
    assert_eq!(secrets.get("CLAWCON_TEST_DEFINITELY_UNSET_VAR"), None);
}

#[test]
fn debug_output_hides_values() {
    let secrets = Secrets::from_map(BTreeMap::from([(
        "BOT_KEY_ENC_KEY".to_owned(),
        "super-secret-master".to_owned(),
    )]));
    let rendered = format!("{secrets:?}");
    assert!(rendered.contains("BOT_KEY_ENC_KEY"));
    assert!(!rendered.contains("super-secret-master"));
    assert_eq!(
        secrets.get("BOT_KEY_ENC_KEY").as_deref(),
        Some("super-secret-master")
    );
}
