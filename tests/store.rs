use std::collections::BTreeMap;
use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use ecosystem_manager::domain::NameId;
use ecosystem_manager::error::EcosystemError;
use ecosystem_manager::member::Member;
use ecosystem_manager::store::TomlStore;

fn root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

fn member(name: &str, url: &str) -> Member {
    let mut member = Member::new(name, Some(url)).unwrap();
    member.description = Some(format!("{name} description"));
    member.labels.insert("chemistry".to_string());
    member
}

fn collection(members: Vec<Member>) -> BTreeMap<NameId, Member> {
    members
        .into_iter()
        .map(|member| (member.name_id(), member))
        .collect()
}

fn file_names(dir: &Utf8Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn missing_directory_reads_as_empty() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    assert!(store.read().unwrap().is_empty());
}

#[test]
fn write_then_read_round_trips() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    let members = collection(vec![
        member("Qiskit Aer", "https://github.com/Qiskit/qiskit-aer"),
        member("Mitiq", "https://github.com/unitaryfund/mitiq"),
    ]);

    store.write(&members).unwrap();
    let read = store.read().unwrap();

    assert_eq!(read.len(), 2);
    for (name_id, original) in &members {
        let restored = &read[name_id];
        assert_eq!(restored.to_record().unwrap(), original.to_record().unwrap());
        assert_eq!(restored.uuid, original.uuid);
    }
}

#[test]
fn write_replaces_the_whole_collection() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    let first = member("First", "https://example.org/first");
    let second = member("Second", "https://example.org/second");

    store
        .write(&collection(vec![first.clone(), second.clone()]))
        .unwrap();
    store.write(&collection(vec![second.clone()])).unwrap();

    assert_eq!(
        file_names(store.members_dir()),
        vec![format!("{}.toml", second.name_id())]
    );
    assert_eq!(file_names(&root(&temp)), vec!["members".to_string()]);
}

#[test]
fn empty_file_is_reported_with_its_path() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    fs::create_dir_all(store.members_dir().as_std_path()).unwrap();
    let path = store.members_dir().join("broken_1234.toml");
    fs::write(path.as_std_path(), "").unwrap();

    let err = store.read().unwrap_err();
    assert_matches!(err, EcosystemError::StoreCorrupt { path: ref reported, .. } if reported == path.as_std_path());
}

#[test]
fn malformed_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    fs::create_dir_all(store.members_dir().as_std_path()).unwrap();
    fs::write(
        store.members_dir().join("bad_1234.toml").as_std_path(),
        "name = [unterminated",
    )
    .unwrap();

    assert_matches!(store.read(), Err(EcosystemError::StoreCorrupt { .. }));
}

#[test]
fn failed_transaction_leaves_files_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    let kept = member("Kept", "https://example.org/kept");
    store.write(&collection(vec![kept.clone()])).unwrap();

    let result: Result<(), _> = store.transaction(|members| {
        members.clear();
        Err(EcosystemError::MemberNotFound("nobody".to_string()))
    });

    assert_matches!(result, Err(EcosystemError::MemberNotFound(_)));
    assert!(store.read().unwrap().contains_key(&kept.name_id()));
}

#[test]
fn stored_file_is_sparse_toml() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    let member = member("Sparse", "https://github.com/org/sparse");
    store.write(&collection(vec![member.clone()])).unwrap();

    let content = fs::read_to_string(store.member_path(&member.name_id()).as_std_path()).unwrap();
    assert!(content.contains("name = \"Sparse\""));
    assert!(content.contains("[github]"));
    assert!(!content.contains("licence"));
    assert!(!content.contains("ibm_maintained"));
    assert!(!content.contains("badge"));
}

#[test]
fn uuid_less_file_has_a_stable_identity() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    fs::create_dir_all(store.members_dir().as_std_path()).unwrap();
    fs::write(
        store.members_dir().join("legacy.toml").as_std_path(),
        "name = \"Legacy\"\nurl = \"https://github.com/org/legacy\"\n",
    )
    .unwrap();

    let first = store.read().unwrap();
    let second = store.read().unwrap();
    let (name_id, member) = first.iter().next().unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(name_id, &member.name_id());
    assert_eq!(second[name_id].uuid, member.uuid);

    store.transaction(|_| Ok(())).unwrap();
    assert_eq!(file_names(store.members_dir()), vec![format!("{name_id}.toml")]);
    assert_eq!(store.read().unwrap()[name_id].uuid, member.uuid);
}

#[test]
fn hand_renamed_member_is_keyed_by_its_new_name() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    let original = member("Original", "https://example.org/original");
    store.write(&collection(vec![original.clone()])).unwrap();

    let path = store.member_path(&original.name_id());
    let content = fs::read_to_string(path.as_std_path()).unwrap();
    fs::write(
        path.as_std_path(),
        content.replace("name = \"Original\"", "name = \"Renamed\""),
    )
    .unwrap();

    let read = store.read().unwrap();
    let renamed = read.values().next().unwrap();
    assert_eq!(renamed.name, "Renamed");
    assert!(read.contains_key(&renamed.name_id()));
    assert!(!read.contains_key(&original.name_id()));

    store.write(&read).unwrap();
    assert_eq!(
        file_names(store.members_dir()),
        vec![format!("{}.toml", renamed.name_id())]
    );
}

#[test]
fn two_files_for_one_member_are_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let store = TomlStore::new(root(&temp));
    let twin = member("Twin", "https://example.org/twin");
    store.write(&collection(vec![twin.clone()])).unwrap();
    fs::copy(
        store.member_path(&twin.name_id()).as_std_path(),
        store.members_dir().join("copy.toml").as_std_path(),
    )
    .unwrap();

    assert_matches!(store.read(), Err(EcosystemError::StoreCorrupt { .. }));
}
