//! Coverage for config parsing and file loading.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use clawcon::config::{load_config, load_config_or_default, Config};
use clawcon::links::LinkPolicy;

#[test]
fn defaults_cover_every_section() {
    let config = Config::default();
    assert_eq!(config.server.bind, SocketAddr::from(([127, 0, 0, 1], 8787)));
    assert_eq!(config.database.path, Path::new("clawcon.db"));
    assert_eq!(config.limits.reveal.policy().max, 3);
    assert_eq!(
        config.limits.ingest.policy().window,
        Duration::from_secs(3600)
    );
    assert_eq!(config.links.max_links, 16);
    assert!(!config.links.require_at_least_one);
    assert_eq!(config.sessions.ttl_hours, 720);
    assert_eq!(config.logging.dir, Path::new("logs"));
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[server]
bind = "0.0.0.0:9000"

[database]
path = "/var/lib/clawcon/keys.db"

[limits.reveal]
max = 5
window_secs = 600

[limits.ingest]
max = 100

[links]
policy = "reject_payload"
require_at_least_one = true
allowed_hosts = ["github.com", "youtube.com"]

[sessions]
ttl_hours = 12
"#;
    let config: Config = toml::from_str(toml_str).expect("config should parse");
    assert_eq!(config.server.bind.port(), 9000);
    assert_eq!(config.limits.reveal.max, 5);
    assert_eq!(config.limits.reveal.window_secs, 600);
    assert_eq!(config.limits.ingest.max, 100);
    assert_eq!(config.limits.ingest.window_secs, 3600);
    assert_eq!(config.links.policy, LinkPolicy::RejectPayload);
    assert_eq!(config.links.allowed_hosts.len(), 2);
    assert_eq!(config.sessions.ttl_hours, 12);
}

#[test]
fn unknown_link_policy_is_an_error() {
    let result: Result<Config, _> = toml::from_str("[links]\npolicy = \"keep_everything\"\n");
    assert!(result.is_err());
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");

    assert!(load_config(&path).is_err());
    let config = load_config_or_default(&path).expect("defaults should load");
    assert_eq!(config.crypto.key_version, 1);
}

#[test]
fn load_config_reads_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[crypto]\nkey_version = 4\n").expect("should write config");

    let config = load_config(&path).expect("config should load");
    assert_eq!(config.crypto.key_version, 4);
}

#[test]
fn malformed_file_is_reported() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[crypto\n").expect("should write config");

    let err = load_config_or_default(&path).expect_err("malformed config should fail");
    assert!(err.to_string().contains("failed to parse config"));
}
