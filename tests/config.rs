use std::time::Duration;

use assert_matches::assert_matches;

use ecosystem_manager::config::{ConfigLoader, BITLY_TOKEN_VAR, GITHUB_TOKEN_VAR};
use ecosystem_manager::error::EcosystemError;

#[test]
fn file_values_and_environment_combine() {
    let config = ConfigLoader::parse(
        r#"
resources_dir = "data"
http_timeout_secs = 30
github_cache_ttl_secs = 60
release_table_path = "/tmp/releases.json"
release_table_max_age_hours = 6

[badge]
domain = "example.link"
"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config, |key| match key {
        GITHUB_TOKEN_VAR => Some("gh-secret".to_string()),
        BITLY_TOKEN_VAR => Some("   ".to_string()),
        _ => None,
    })
    .unwrap();

    assert_eq!(resolved.resources_dir.as_str(), "data");
    assert_eq!(resolved.http_timeout, Duration::from_secs(30));
    assert_eq!(resolved.github_cache_ttl, Duration::from_secs(60));
    assert_eq!(resolved.release_table_path.as_str(), "/tmp/releases.json");
    assert_eq!(resolved.release_table_max_age, chrono::Duration::hours(6));
    assert_eq!(resolved.badge.domain, "example.link");
    assert_eq!(resolved.badge.group_guid, "Bj9rgMHKfxH");
    assert_eq!(resolved.github_token.as_deref(), Some("gh-secret"));
    assert_eq!(resolved.bitly_token, None);
    assert_matches!(
        resolved.require_bitly_token(),
        Err(EcosystemError::MissingCredential("BITLY_TOKEN"))
    );
}

#[test]
fn unknown_keys_are_rejected() {
    assert_matches!(
        ConfigLoader::parse("colour = \"blue\""),
        Err(EcosystemError::ConfigParse(_))
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    assert_matches!(
        ConfigLoader::resolve(Some("/definitely/not/here/ecosystem.toml")),
        Err(EcosystemError::ConfigRead(_))
    );
}
