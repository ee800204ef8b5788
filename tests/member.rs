use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;

use ecosystem_manager::error::{EcosystemError, Upstream};
use ecosystem_manager::member::{Member, MemberRecord};
use ecosystem_manager::shortener::LinkShortener;
use ecosystem_manager::submission::Submission;

#[derive(Default)]
struct CountingShortener {
    calls: AtomicUsize,
}

impl LinkShortener for CountingShortener {
    fn shorten_badge(&self, _name: &str, short_uuid: &str) -> Result<String, EcosystemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://qisk.it/e-{short_uuid}"))
    }
}

struct FailingShortener;

impl LinkShortener for FailingShortener {
    fn shorten_badge(&self, _name: &str, _short_uuid: &str) -> Result<String, EcosystemError> {
        Err(EcosystemError::UpstreamStatus {
            upstream: Upstream::Shortener,
            status: 403,
            message: "FORBIDDEN".to_string(),
        })
    }
}

#[test]
fn name_id_is_stable_across_round_trips() {
    let mut member = Member::new("Qiskit Machine Learning!", Some("https://github.com/Qiskit/qiskit-machine-learning")).unwrap();
    member.licence = Some("Apache 2.0".to_string());
    member.ibm_maintained = true;
    member.labels.insert("machine learning".to_string());
    member.packages = vec!["https://pypi.org/project/qiskit-machine-learning".to_string()];
    member.discover_packages().unwrap();

    let toml = toml::to_string(&member.to_record().unwrap()).unwrap();
    let record: MemberRecord = toml::from_str(&toml).unwrap();
    let restored = Member::from_record(record).unwrap();

    assert_eq!(restored.name_id(), member.name_id());
    assert!(restored.name_id().as_str().starts_with("qiskitmach_"));
    assert_eq!(restored.short_uuid(), member.short_uuid());
    assert_eq!(restored.to_record().unwrap(), member.to_record().unwrap());
    assert_eq!(restored, member);
}

#[test]
fn legacy_category_key_reads_as_group() {
    let record: MemberRecord = toml::from_str(
        r#"
name = "Legacy"
url = "https://github.com/org/legacy"
category = "Algorithms"
uuid = "0b8e4a3c-1111-4222-8333-444455556666"
"#,
    )
    .unwrap();
    let member = Member::from_record(record).unwrap();

    assert_eq!(member.group.as_deref(), Some("Algorithms"));
    assert_eq!(member.name_id().as_str(), "legacy_0b8e4a3c");
    let github = member.github.as_ref().unwrap();
    assert_eq!(github.repo, "legacy");
}

#[test]
fn uuid_is_assigned_once() {
    let record: MemberRecord = toml::from_str("name = \"No Uuid\"").unwrap();
    let member = Member::from_record(record).unwrap();
    let record = member.to_record().unwrap();
    let again = Member::from_record(record).unwrap();
    assert_eq!(again.uuid, member.uuid);
}

#[test]
fn badge_is_minted_once() {
    let shortener = CountingShortener::default();
    let mut member = Member::new("Badge Me", None).unwrap();

    assert!(member.update_badge(&shortener).unwrap());
    assert!(!member.update_badge(&shortener).unwrap());

    assert_eq!(shortener.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        member.badge.as_deref(),
        Some(format!("https://qisk.it/e-{}", member.short_uuid()).as_str())
    );
}

#[test]
fn failed_badge_leaves_member_untouched() {
    let mut member = Member::new("No Badge", None).unwrap();
    assert_matches!(
        member.update_badge(&FailingShortener),
        Err(EcosystemError::UpstreamStatus { status: 403, .. })
    );
    assert_eq!(member.badge, None);
}

#[test]
fn submission_fields_are_carried_over() {
    let submission = Submission {
        name: "Plugin".to_string(),
        url: Some("https://github.com/org/plugin".to_string()),
        description: Some("A plugin".to_string()),
        labels: vec!["chemistry".to_string(), "chemistry".to_string()],
        group: Some("Algorithms".to_string()),
        packages: vec!["https://pypi.org/project/plugin".to_string()],
        ..Submission::default()
    };
    let member = Member::from_submission(submission).unwrap();

    assert_eq!(member.labels.len(), 1);
    assert_eq!(member.group.as_deref(), Some("Algorithms"));
    assert!(member.github.is_some());
    assert!(member.pypi.contains_key("plugin"));
    assert!(member.created_at.is_some());
}

#[test]
fn bad_github_url_is_rejected() {
    assert_matches!(
        Member::new("Bad", Some("https://github.com/just-an-owner")),
        Err(EcosystemError::InvalidSourceUrl { .. })
    );
}

#[test]
fn twin_records_keep_distinct_name_ids() {
    let record = |uuid: &str| MemberRecord {
        name: "Twin".to_string(),
        uuid: Some(uuid.to_string()),
        ..MemberRecord::default()
    };
    let first = Member::from_record(record("11111111-1111-4111-8111-111111111111")).unwrap();
    let second = Member::from_record(record("22222222-2222-4222-8222-222222222222")).unwrap();
    assert_ne!(first.name_id(), second.name_id());
}

#[test]
fn uuid_less_records_derive_the_same_uuid() {
    let record: MemberRecord =
        toml::from_str("name = \"Legacy\"\nurl = \"https://github.com/org/legacy\"").unwrap();
    let first = Member::from_record(record.clone()).unwrap();
    let second = Member::from_record(record).unwrap();
    assert_eq!(first.uuid, second.uuid);
    assert_eq!(first.name_id(), second.name_id());
}
