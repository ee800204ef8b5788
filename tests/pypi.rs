use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use url::Url;

use ecosystem_manager::error::{EcosystemError, Upstream};
use ecosystem_manager::pypi::{PyPIData, PypiClient, PypiRecord, ReleaseTable};

struct DummyPypi {
    project: Value,
}

impl PypiClient for DummyPypi {
    fn project(&self, _name: &str) -> Result<Value, EcosystemError> {
        Ok(self.project.clone())
    }

    fn recent_downloads(&self, _name: &str) -> Result<Value, EcosystemError> {
        Ok(json!({"data": {"last_day": 5, "last_week": 50, "last_month": 321}}))
    }
}

struct OfflinePypi;

impl PypiClient for OfflinePypi {
    fn project(&self, _name: &str) -> Result<Value, EcosystemError> {
        Err(EcosystemError::http(Upstream::Pypi, "offline"))
    }

    fn recent_downloads(&self, _name: &str) -> Result<Value, EcosystemError> {
        Err(EcosystemError::http(Upstream::Pypi, "offline"))
    }
}

fn project_json(requires_dist: Value) -> Value {
    json!({
        "info": {
            "version": "0.7.1",
            "summary": "Demo plugin",
            "license": "",
            "requires_python": ">=3.9",
            "requires_dist": requires_dist
        },
        "urls": [
            {"packagetype": "bdist_wheel", "upload_time_iso_8601": "2024-03-02T10:00:00.000000Z"},
            {"packagetype": "sdist", "upload_time_iso_8601": "2024-03-01T09:00:00.000000Z"}
        ],
        "releases": {"0.45.0": [], "1.0.0rc1": [], "1.0.0": [], "1.2.4": [], "2.0.0": []}
    })
}

fn fetched(requires_dist: Value) -> PyPIData {
    let mut data = PyPIData::new("qiskit-demo").unwrap();
    data.update_json(&DummyPypi {
        project: project_json(requires_dist),
    });
    data
}

#[test]
fn project_urls_are_canonicalized() {
    let url = Url::parse("https://pypi.org/project/Qiskit_Nature/").unwrap();
    let data = PyPIData::from_url(&url).unwrap().unwrap();
    assert_eq!(data.project(), "qiskit-nature");

    let other = Url::parse("https://example.org/project/x").unwrap();
    assert_matches!(PyPIData::from_url(&other), Ok(None));

    let bad = Url::parse("https://pypi.org/simple").unwrap();
    assert_matches!(
        PyPIData::from_url(&bad),
        Err(EcosystemError::InvalidSourceUrl { kind: "PyPI", .. })
    );
}

#[test]
fn invalid_names_are_rejected() {
    assert_matches!(
        PyPIData::new("-bad-"),
        Err(EcosystemError::InvalidPackageName(_))
    );
}

#[test]
fn multi_valued_field_without_reducer_is_ambiguous() {
    let data = fetched(json!([]));
    assert_matches!(
        data.attribute("package_type"),
        Err(EcosystemError::AmbiguousAttribute { matches: 2, .. })
    );
    assert_eq!(
        data.latest_upload().unwrap().as_deref(),
        Some("2024-03-02T10:00:00.000000Z")
    );
    assert_eq!(data.version().unwrap().as_deref(), Some("0.7.1"));
    assert_eq!(data.attribute("license").unwrap(), Value::Null);
}

#[test]
fn requires_qiskit_reads_requires_dist() {
    let data = fetched(json!([
        "numpy>=1.17",
        "qiskit<2,>=1.0; python_version >= \"3.9\"",
        "pytest; extra == \"test\""
    ]));
    assert_eq!(data.requires_qiskit().as_deref(), Some("<2,>=1.0"));
    assert_eq!(data.last_month_downloads(), Some(321));
}

#[test]
fn empty_qiskit_specifier_becomes_unbounded() {
    let data = fetched(json!(["qiskit"]));
    assert_eq!(data.requires_qiskit().as_deref(), Some(">=0"));
}

#[test]
fn compatibility_uses_final_releases() {
    let mut data = fetched(json!(["qiskit>=0.45"]));
    let table = ReleaseTable::fetch(
        &DummyPypi {
            project: project_json(json!([])),
        },
        "qiskit",
    )
    .unwrap();
    data.update_compatibility(&table).unwrap();
    assert_eq!(data.compatible_qiskit_majors(), Some(vec![0, 1, 2]));

    let mut narrow = fetched(json!(["qiskit~=1.1"]));
    narrow.update_compatibility(&table).unwrap();
    assert_eq!(narrow.compatible_qiskit_majors(), Some(vec![1]));
}

#[test]
fn failed_lookup_keeps_stored_values() {
    let record = PypiRecord {
        version: Some("0.1.0".to_string()),
        requires_qiskit: Some(">=1".to_string()),
        compatible_qiskit_majors: Some(vec![1]),
        last_month_downloads: Some(10),
    };
    let mut data = PyPIData::from_record("qiskit-demo", &record).unwrap();
    data.update_json(&OfflinePypi);

    assert!(!data.is_fetched());
    assert_eq!(data.version().unwrap().as_deref(), Some("0.1.0"));
    assert_eq!(data.to_record(), record);
}

#[test]
fn release_table_falls_back_to_stale_copy() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("qiskit.json")).unwrap();
    let stale = ReleaseTable {
        package: "qiskit".to_string(),
        fetched_at: Utc::now() - Duration::days(30),
        releases: vec!["1.0.0".to_string()],
    };
    stale.save(&path).unwrap();

    let table = ReleaseTable::load_or_refresh(&path, &OfflinePypi, "qiskit", Duration::hours(24))
        .unwrap();
    assert_eq!(table, stale);

    let online = DummyPypi {
        project: project_json(json!([])),
    };
    let refreshed =
        ReleaseTable::load_or_refresh(&path, &online, "qiskit", Duration::hours(24)).unwrap();
    assert_eq!(refreshed.releases.len(), 5);
    assert_eq!(ReleaseTable::load(&path).unwrap(), Some(refreshed));
}

#[test]
fn missing_release_table_without_network_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("none.json")).unwrap();
    assert_matches!(
        ReleaseTable::load_or_refresh(&path, &OfflinePypi, "qiskit", Duration::hours(1)),
        Err(EcosystemError::UpstreamHttp { .. })
    );
}
