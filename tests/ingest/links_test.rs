//! Link sanitizing cases seen on the submission path.

use clawcon::links::{LinkPolicy, LinkSanitizer};

#[test]
fn scenario_links_keep_only_the_https_one() {
    let sanitizer = LinkSanitizer::default();
    let result = sanitizer.sanitize_all(&["javascript:alert(1)", "https://good.example"]);
    assert_eq!(result.accepted, vec!["https://good.example/".to_owned()]);
    assert_eq!(result.rejected, 1);
}

#[test]
fn every_link_is_judged_independently() {
    let sanitizer = LinkSanitizer::new(&["github.com".to_owned()]);
    let result = sanitizer.sanitize_all(&[
        "https://github.com/a",
        "https://gitlab.com/b",
        "http://github.com/c",
        "https://github.com/d",
    ]);
    assert_eq!(
        result.accepted,
        vec![
            "https://github.com/a".to_owned(),
            "https://github.com/d".to_owned()
        ]
    );
    assert_eq!(result.rejected, 2);
}

#[test]
fn empty_input_yields_nothing() {
    let sanitizer = LinkSanitizer::default();
    let result = sanitizer.sanitize_all::<&str>(&[]);
    assert!(result.accepted.is_empty());
    assert_eq!(result.rejected, 0);
}

#[test]
fn policy_parses_from_config_strings() {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        policy: LinkPolicy,
    }
    let parsed: Wrapper = toml::from_str(r#"policy = "reject_payload""#).expect("should parse");
    assert_eq!(parsed.policy, LinkPolicy::RejectPayload);
    assert_eq!(LinkPolicy::default(), LinkPolicy::DropInvalid);
}
