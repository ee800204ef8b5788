use assert_matches::assert_matches;

use ecosystem_manager::domain::{NameId, normalize_url, parse_url, short_uuid};
use ecosystem_manager::error::EcosystemError;

#[test]
fn name_id_is_deterministic() {
    let uuid = "9f86d081-884c-4d63-a9b3-ab5e1e3c3d4f";
    assert_eq!(NameId::derive("Mitiq", uuid).as_str(), "mitiq_9f86d081");
    assert_eq!(NameId::derive("Mitiq", uuid), NameId::derive("Mitiq", uuid));
    assert_eq!(NameId::derive("  ", uuid).as_str(), "_9f86d081");
}

#[test]
fn same_name_different_uuid_gives_distinct_name_ids() {
    let first = NameId::derive("Qiskit Plugin", "0b8e4a3c-1111-4222-8333-444455556666");
    let second = NameId::derive("Qiskit Plugin", "7c1d2e3f-1111-4222-8333-444455556666");
    assert_ne!(first, second);
    assert!(first.as_str().starts_with("qiskitplug_"));
    assert!(second.as_str().starts_with("qiskitplug_"));
}

#[test]
fn name_id_parse_accepts_file_stems() {
    let id: NameId = "mitiq_9f86d081.toml".parse().unwrap();
    assert_eq!(id.as_str(), "mitiq_9f86d081");
}

#[test]
fn name_id_parse_rejects_paths() {
    let err = "../escape".parse::<NameId>().unwrap_err();
    assert_matches!(err, EcosystemError::InvalidNameId(_));
}

#[test]
fn short_uuid_is_first_group() {
    assert_eq!(short_uuid("9f86d081-884c-4d63-a9b3-ab5e1e3c3d4f"), "9f86d081");
    assert_eq!(short_uuid("plain"), "plain");
}

#[test]
fn urls_gain_a_scheme_and_lose_trailing_slashes() {
    assert_eq!(
        normalize_url("github.com/Qiskit/qiskit/").unwrap(),
        "https://github.com/Qiskit/qiskit"
    );
    assert_eq!(normalize_url("https://qiskit.org").unwrap(), "https://qiskit.org");
    assert_eq!(parse_url("http://example.org/x").unwrap().scheme(), "http");
}

#[test]
fn garbage_urls_are_rejected() {
    assert_matches!(parse_url("http://"), Err(EcosystemError::InvalidUrl(_)));
}
