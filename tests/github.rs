use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use serde_json::{Value, json};
use url::Url;

use ecosystem_manager::error::{EcosystemError, Upstream};
use ecosystem_manager::github::{GitHubData, GithubClient, GithubRecord};

#[derive(Default)]
struct CountingGithub {
    repository_calls: AtomicUsize,
    owner: &'static str,
    name: &'static str,
    fail_pages: bool,
}

impl CountingGithub {
    fn new(owner: &'static str, name: &'static str) -> Self {
        Self {
            owner,
            name,
            ..Self::default()
        }
    }
}

impl GithubClient for CountingGithub {
    fn repository(&self, _owner: &str, _repo: &str) -> Result<Value, EcosystemError> {
        self.repository_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "html_url": format!("https://github.com/{}/{}", self.owner, self.name),
            "name": self.name,
            "owner": {"login": self.owner},
            "stargazers_count": 42,
            "homepage": "",
            "license": {"name": "Apache License 2.0"},
            "description": "A demo repository",
            "private": false,
            "archived": false,
            "disabled": false,
            "pushed_at": "2024-05-01T10:00:00Z"
        }))
    }

    fn events(&self, _owner: &str, _repo: &str) -> Result<Value, EcosystemError> {
        if self.fail_pages {
            return Err(EcosystemError::http(Upstream::Github, "events offline"));
        }
        Ok(json!([{"created_at": "2024-06-01T12:00:00Z"}, {"created_at": "2024-05-01T12:00:00Z"}]))
    }

    fn front_page(&self, _owner: &str, _repo: &str) -> Result<String, EcosystemError> {
        if self.fail_pages {
            return Err(EcosystemError::http(Upstream::Github, "front page offline"));
        }
        Ok(r#"Contributors <span title="12" class="Counter">12</span>"#.to_string())
    }

    fn dependents_page(
        &self,
        _owner: &str,
        _repo: &str,
        _package_id: Option<&str>,
    ) -> Result<String, EcosystemError> {
        if self.fail_pages {
            return Err(EcosystemError::http(Upstream::Github, "dependents offline"));
        }
        Ok("<a>7 Repositories</a><a>2 Packages</a>".to_string())
    }
}

struct BrokenGithub;

impl GithubClient for BrokenGithub {
    fn repository(&self, _owner: &str, _repo: &str) -> Result<Value, EcosystemError> {
        Err(EcosystemError::UpstreamStatus {
            upstream: Upstream::Github,
            status: 404,
            message: "Not Found".to_string(),
        })
    }

    fn events(&self, _owner: &str, _repo: &str) -> Result<Value, EcosystemError> {
        unreachable!("events are only fetched after the repository")
    }

    fn front_page(&self, _owner: &str, _repo: &str) -> Result<String, EcosystemError> {
        unreachable!("front page is only fetched after the repository")
    }

    fn dependents_page(
        &self,
        _owner: &str,
        _repo: &str,
        _package_id: Option<&str>,
    ) -> Result<String, EcosystemError> {
        unreachable!("dependents are only fetched after the repository")
    }
}

fn parse(url: &str) -> Result<Option<GitHubData>, EcosystemError> {
    GitHubData::from_url(&Url::parse(url).unwrap())
}

#[test]
fn url_parsing_extracts_owner_repo_and_tree() {
    let data = parse("https://github.com/Qiskit/qiskit-aer").unwrap().unwrap();
    assert_eq!((data.owner.as_str(), data.repo.as_str()), ("Qiskit", "qiskit-aer"));
    assert_eq!(data.tree, None);

    let data = parse("https://github.com/org/mono/tree/main/packages/tool")
        .unwrap()
        .unwrap();
    assert_eq!((data.owner.as_str(), data.repo.as_str()), ("org", "mono"));
    assert_eq!(data.tree.as_deref(), Some("main/packages/tool"));
}

#[test]
fn url_parsing_rejects_bad_shapes_and_ignores_other_hosts() {
    assert_matches!(
        parse("https://github.com/only-owner"),
        Err(EcosystemError::InvalidSourceUrl { kind: "GitHub", .. })
    );
    assert_matches!(
        parse("https://github.com/a/b/c"),
        Err(EcosystemError::InvalidSourceUrl { .. })
    );
    assert_matches!(parse("https://gitlab.com/a/b"), Ok(None));
}

#[test]
fn attributes_never_fetch_on_their_own() {
    let client = CountingGithub::new("Qiskit", "demo");
    let mut data = GitHubData::new("Qiskit", "demo", None).with_fallback("stars", 3);

    assert_eq!(data.stars().unwrap(), Some(3));
    assert_eq!(data.license().unwrap(), None);
    assert_eq!(client.repository_calls.load(Ordering::SeqCst), 0);

    data.update_json(&client).unwrap();
    assert_eq!(client.repository_calls.load(Ordering::SeqCst), 1);
    assert_eq!(data.stars().unwrap(), Some(42));
    assert_eq!(data.license().unwrap().as_deref(), Some("Apache License 2.0"));
    assert_eq!(data.homepage().unwrap(), None);
    assert_eq!(data.estimated_contributors(), Some(12));
    assert_eq!(data.total_dependent_repositories(), Some(7));
    assert_eq!(data.total_dependent_packages(), Some(2));
    assert_eq!(
        data.last_activity().map(|at| at.to_rfc3339()),
        Some("2024-06-01T12:00:00+00:00".to_string())
    );

    data.stars().unwrap();
    assert_eq!(client.repository_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn secondary_pages_are_best_effort() {
    let client = CountingGithub {
        fail_pages: true,
        ..CountingGithub::new("Qiskit", "demo")
    };
    let mut data = GitHubData::new("Qiskit", "demo", None)
        .with_fallback("estimated_contributors", 5)
        .with_fallback("total_dependent_repositories", 9);

    data.update_json(&client).unwrap();
    assert_eq!(data.stars().unwrap(), Some(42));
    assert_eq!(data.estimated_contributors(), Some(5));
    assert_eq!(data.total_dependent_repositories(), Some(9));
    assert_eq!(data.last_activity(), None);
}

#[test]
fn repository_failure_propagates() {
    let mut data = GitHubData::new("gone", "repo", None);
    assert_matches!(
        data.update_json(&BrokenGithub),
        Err(EcosystemError::UpstreamStatus { status: 404, .. })
    );
    assert!(!data.is_fetched());
}

#[test]
fn renamed_repository_updates_identity() {
    let client = CountingGithub::new("new-owner", "new-name");
    let mut data = GitHubData::new("old-owner", "old-name", None);

    assert!(data.update_owner_repo(&client).unwrap());
    assert_eq!((data.owner.as_str(), data.repo.as_str()), ("new-owner", "new-name"));
    assert!(!data.update_owner_repo(&client).unwrap());
    assert_eq!(client.repository_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_attribute_is_an_error() {
    let data = GitHubData::new("a", "b", None);
    assert_matches!(
        data.attribute("forks"),
        Err(EcosystemError::UnknownAttribute { attribute, .. }) if attribute == "forks"
    );
}

#[test]
fn record_round_trip_through_fallbacks() {
    let client = CountingGithub::new("Qiskit", "demo");
    let mut data = GitHubData::new("Qiskit", "demo", Some("main".to_string()));
    data.update_json(&client).unwrap();

    let record = data.to_record().unwrap();
    assert_eq!(record.stars, Some(42));
    assert_eq!(record.homepage, None);
    assert_eq!(record.private, None);

    let restored = GitHubData::from_record(&record).unwrap();
    assert!(!restored.is_fetched());
    assert_eq!(restored.to_record().unwrap(), record);
    assert_eq!(restored, data);
}

#[test]
fn sparse_record_deserializes() {
    let record: GithubRecord = toml::from_str("owner = \"o\"\nrepo = \"r\"\nstars = 1\n").unwrap();
    let data = GitHubData::from_record(&record).unwrap();
    assert_eq!(data.stars().unwrap(), Some(1));
    assert_eq!(data.description().unwrap(), None);
}
