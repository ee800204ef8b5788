use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{EcosystemError, Upstream};
use crate::http::{HttpClient, ResponseCache};
use crate::source::{
    self, MetadataSource, Reducer, SourceField, null_if_falsy, resolve_as, resolve_opt,
};

const API_BASE: &str = "https://api.github.com";
const WEB_BASE: &str = "https://github.com";
const DESCRIPTION_LIMIT: usize = 135;

static PATH_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static regex"));
static CONTRIBUTORS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)Contributors\s*<span[^>]*title="([\d,]+)""#).expect("static regex")
});
static PACKAGE_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="[^"]*/network/dependents\?[^"]*package_id=([A-Za-z0-9%=_-]+)"[^>]*>\s*(?:<[^>]+>\s*)*([^<\s][^<]*?)\s*<"#)
        .expect("static regex")
});
static DEPENDENT_REPOSITORIES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+)\s+Repositor(?:y|ies)").expect("static regex"));
static DEPENDENT_PACKAGES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+)\s+Packages?\b").expect("static regex"));

/// Attributes read from the repository JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GithubField {
    Url,
    Stars,
    Homepage,
    License,
    Description,
    Private,
    Archived,
    Disabled,
    LastCommit,
}

impl SourceField for GithubField {
    const ALL: &'static [Self] = &[
        GithubField::Url,
        GithubField::Stars,
        GithubField::Homepage,
        GithubField::License,
        GithubField::Description,
        GithubField::Private,
        GithubField::Archived,
        GithubField::Disabled,
        GithubField::LastCommit,
    ];

    fn name(self) -> &'static str {
        match self {
            GithubField::Url => "url",
            GithubField::Stars => "stars",
            GithubField::Homepage => "homepage",
            GithubField::License => "license",
            GithubField::Description => "description",
            GithubField::Private => "private",
            GithubField::Archived => "archived",
            GithubField::Disabled => "disabled",
            GithubField::LastCommit => "last_commit",
        }
    }

    fn path(self) -> &'static str {
        match self {
            GithubField::Url => "html_url",
            GithubField::Stars => "stargazers_count",
            GithubField::Homepage => "homepage",
            GithubField::License => "license.name",
            GithubField::Description => "description",
            GithubField::Private => "private",
            GithubField::Archived => "archived",
            GithubField::Disabled => "disabled",
            GithubField::LastCommit => "pushed_at",
        }
    }

    fn transform(self, value: Value) -> Value {
        match self {
            GithubField::Homepage
            | GithubField::Private
            | GithubField::Archived
            | GithubField::Disabled => null_if_falsy(value),
            GithubField::Description => truncate_description(value),
            _ => value,
        }
    }

    fn reducer(self) -> Option<Reducer> {
        None
    }
}

fn truncate_description(value: Value) -> Value {
    match value {
        Value::String(text) if text.chars().count() > DESCRIPTION_LIMIT => {
            let head: String = text.chars().take(DESCRIPTION_LIMIT - 4).collect();
            Value::String(format!("{head}..."))
        }
        other => other,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentCounts {
    pub repositories: u64,
    pub packages: u64,
}

/// Sparse serialized form of [`GitHubData`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GithubRecord {
    pub owner: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_contributors: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_dependent_repositories: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_dependent_packages: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

pub trait GithubClient: Send + Sync {
    fn repository(&self, owner: &str, repo: &str) -> Result<Value, EcosystemError>;
    fn events(&self, owner: &str, repo: &str) -> Result<Value, EcosystemError>;
    fn front_page(&self, owner: &str, repo: &str) -> Result<String, EcosystemError>;
    fn dependents_page(
        &self,
        owner: &str,
        repo: &str,
        package_id: Option<&str>,
    ) -> Result<String, EcosystemError>;
}

#[derive(Clone)]
pub struct GithubHttpClient {
    api: HttpClient,
    web: HttpClient,
}

impl GithubHttpClient {
    /// `api` should carry the shared response cache; `web` scrapes HTML pages.
    pub fn new(api: HttpClient, web: HttpClient) -> Self {
        Self { api, web }
    }

    /// Only API responses go through `cache`; scraped pages are always fetched.
    pub fn with_cache(
        timeout: Duration,
        token: Option<&str>,
        cache: ResponseCache,
    ) -> Result<Self, EcosystemError> {
        Ok(Self::new(
            HttpClient::new(Upstream::Github, timeout, token, Some(cache))?,
            HttpClient::new(Upstream::Github, timeout, None, None)?,
        ))
    }
}

impl GithubClient for GithubHttpClient {
    fn repository(&self, owner: &str, repo: &str) -> Result<Value, EcosystemError> {
        self.api.get_json(&format!("{API_BASE}/repos/{owner}/{repo}"))
    }

    fn events(&self, owner: &str, repo: &str) -> Result<Value, EcosystemError> {
        self.api
            .get_json(&format!("{API_BASE}/networks/{owner}/{repo}/events"))
    }

    fn front_page(&self, owner: &str, repo: &str) -> Result<String, EcosystemError> {
        self.web.get_text(&format!("{WEB_BASE}/{owner}/{repo}"))
    }

    fn dependents_page(
        &self,
        owner: &str,
        repo: &str,
        package_id: Option<&str>,
    ) -> Result<String, EcosystemError> {
        let mut url =
            format!("{WEB_BASE}/{owner}/{repo}/network/dependents?dependent_type=REPOSITORY");
        if let Some(package_id) = package_id {
            url.push_str("&package_id=");
            url.push_str(package_id);
        }
        self.web.get_text(&url)
    }
}

/// GitHub repository behind a member.
#[derive(Debug, Clone, Default)]
pub struct GitHubData {
    pub owner: String,
    pub repo: String,
    pub tree: Option<String>,
    fallbacks: Map<String, Value>,
    repo_json: Option<Value>,
    events_json: Option<Value>,
    estimated_contributors: Option<u64>,
    dependants: Option<BTreeMap<String, DependentCounts>>,
}

impl PartialEq for GitHubData {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_record(), other.to_record()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }
}

impl MetadataSource for GitHubData {
    type Field = GithubField;
    const KIND: &'static str = "GitHubData";

    fn cached_json(&self) -> Option<&Value> {
        self.repo_json.as_ref()
    }

    fn fallbacks(&self) -> &Map<String, Value> {
        &self.fallbacks
    }
}

impl GitHubData {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, tree: Option<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            tree,
            ..Self::default()
        }
    }

    /// Value returned for `key` while nothing has been fetched.
    pub fn with_fallback(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fallbacks.insert(key.to_string(), value.into());
        self
    }

    /// `Ok(None)` when the url is not a GitHub url.
    pub fn from_url(url: &Url) -> Result<Option<Self>, EcosystemError> {
        let Some(host) = url.host_str() else {
            return Ok(None);
        };
        if !host.contains("github.com") {
            return Ok(None);
        }

        let (path, tree) = match url.path().split_once("/tree/") {
            Some((head, tail)) => {
                debug!(path = url.path(), head, tail, "url includes a branch or subdirectory");
                (head, Some(tail.trim_end_matches('/').to_string()))
            }
            None => (url.path(), None),
        };

        let components: Vec<&str> = path
            .split('/')
            .filter(|component| PATH_COMPONENT.is_match(component))
            .collect();
        match components.as_slice() {
            [owner, repo] => Ok(Some(Self::new(*owner, *repo, tree))),
            _ => Err(EcosystemError::InvalidSourceUrl {
                kind: "GitHub",
                url: url.to_string(),
            }),
        }
    }

    pub fn from_record(record: &GithubRecord) -> Result<Self, EcosystemError> {
        Ok(Self {
            owner: record.owner.clone(),
            repo: record.repo.clone(),
            tree: record.tree.clone(),
            fallbacks: source::fallbacks_from(record, &["owner", "repo", "tree"])?,
            ..Self::default()
        })
    }

    pub fn to_record(&self) -> Result<GithubRecord, EcosystemError> {
        let mut map = Map::new();
        map.insert("owner".to_string(), Value::from(self.owner.clone()));
        map.insert("repo".to_string(), Value::from(self.repo.clone()));
        if let Some(tree) = &self.tree {
            map.insert("tree".to_string(), Value::from(tree.clone()));
        }
        source::collect_fields(self, &mut map)?;
        if let Some(value) = self.estimated_contributors() {
            map.insert("estimated_contributors".to_string(), Value::from(value));
        }
        if let Some(value) = self.total_dependent_repositories() {
            map.insert("total_dependent_repositories".to_string(), Value::from(value));
        }
        if let Some(value) = self.total_dependent_packages() {
            map.insert("total_dependent_packages".to_string(), Value::from(value));
        }
        if let Some(value) = self.last_activity() {
            map.insert("last_activity".to_string(), Value::from(value.to_rfc3339()));
        }
        serde_json::from_value(Value::Object(map)).map_err(EcosystemError::serde)
    }

    pub fn is_fetched(&self) -> bool {
        self.repo_json.is_some()
    }

    /// Fetches the repository JSON, then the secondary pages.
    ///
    /// The repository JSON is required. The events feed, front page and
    /// dependents pages are best-effort: a failure logs a warning and leaves the
    /// fallback value in place.
    pub fn update_json(&mut self, client: &dyn GithubClient) -> Result<(), EcosystemError> {
        self.repo_json = Some(client.repository(&self.owner, &self.repo)?);

        match client.events(&self.owner, &self.repo) {
            Ok(events) => self.events_json = Some(events),
            Err(err) => warn!(owner = %self.owner, repo = %self.repo, error = %err, "events feed unavailable"),
        }

        match client.front_page(&self.owner, &self.repo) {
            Ok(html) => self.estimated_contributors = parse_contributors(&html),
            Err(err) => warn!(owner = %self.owner, repo = %self.repo, error = %err, "front page unavailable"),
        }

        match self.fetch_dependants(client) {
            Ok(dependants) => self.dependants = Some(dependants),
            Err(err) => warn!(owner = %self.owner, repo = %self.repo, error = %err, "dependents page unavailable"),
        }
        Ok(())
    }

    fn fetch_dependants(
        &self,
        client: &dyn GithubClient,
    ) -> Result<BTreeMap<String, DependentCounts>, EcosystemError> {
        let landing = client.dependents_page(&self.owner, &self.repo, None)?;
        let packages = parse_package_ids(&landing);
        let mut dependants = BTreeMap::new();
        if packages.is_empty() {
            dependants.insert(self.repo.clone(), parse_dependents(&landing));
            return Ok(dependants);
        }
        for (package, package_id) in packages {
            let html = client.dependents_page(&self.owner, &self.repo, Some(&package_id))?;
            dependants.insert(package, parse_dependents(&html));
        }
        Ok(dependants)
    }

    /// Follows upstream renames and transfers. Returns whether identity changed.
    pub fn update_owner_repo(&mut self, client: &dyn GithubClient) -> Result<bool, EcosystemError> {
        if self.repo_json.is_none() {
            self.update_json(client)?;
        }
        let Some(json) = &self.repo_json else {
            return Ok(false);
        };
        let owner = json
            .get("owner")
            .and_then(|owner| owner.get("login"))
            .and_then(Value::as_str);
        let repo = json.get("name").and_then(Value::as_str);
        let (Some(owner), Some(repo)) = (owner, repo) else {
            return Ok(false);
        };
        if self.owner == owner && self.repo == repo {
            return Ok(false);
        }
        info!("{}/{} moved to {owner}/{repo}", self.owner, self.repo);
        self.owner = owner.to_string();
        self.repo = repo.to_string();
        Ok(true)
    }

    pub fn attribute(&self, name: &str) -> Result<Value, EcosystemError> {
        source::attribute(self, name)
    }

    pub fn stars(&self) -> Result<Option<u64>, EcosystemError> {
        resolve_as(self, GithubField::Stars)
    }

    pub fn homepage(&self) -> Result<Option<String>, EcosystemError> {
        resolve_as(self, GithubField::Homepage)
    }

    pub fn license(&self) -> Result<Option<String>, EcosystemError> {
        resolve_as(self, GithubField::License)
    }

    pub fn description(&self) -> Result<Option<String>, EcosystemError> {
        resolve_as(self, GithubField::Description)
    }

    pub fn archived(&self) -> Result<bool, EcosystemError> {
        Ok(resolve_opt(self, GithubField::Archived)?
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    pub fn last_commit(&self) -> Result<Option<DateTime<Utc>>, EcosystemError> {
        resolve_as(self, GithubField::LastCommit)
    }

    pub fn estimated_contributors(&self) -> Option<u64> {
        self.estimated_contributors
            .or_else(|| self.fallback_u64("estimated_contributors"))
    }

    pub fn total_dependent_repositories(&self) -> Option<u64> {
        match &self.dependants {
            Some(dependants) if !dependants.is_empty() => {
                Some(dependants.values().map(|counts| counts.repositories).sum())
            }
            _ => self.fallback_u64("total_dependent_repositories"),
        }
    }

    pub fn total_dependent_packages(&self) -> Option<u64> {
        match &self.dependants {
            Some(dependants) if !dependants.is_empty() => {
                Some(dependants.values().map(|counts| counts.packages).sum())
            }
            _ => self.fallback_u64("total_dependent_packages"),
        }
    }

    /// Creation time of the most recent network event.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        let fetched = self
            .events_json
            .as_ref()
            .and_then(|events| events.get(0))
            .and_then(|event| event.get("created_at"))
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        fetched.or_else(|| {
            self.fallback("last_activity")
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
        })
    }

    fn fallback_u64(&self, key: &str) -> Option<u64> {
        self.fallback(key).and_then(Value::as_u64)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

fn parse_count(value: &str) -> Option<u64> {
    value.replace(',', "").parse().ok()
}

pub fn parse_contributors(html: &str) -> Option<u64> {
    CONTRIBUTORS
        .captures(html)
        .and_then(|caps| caps.get(1))
        .and_then(|count| parse_count(count.as_str()))
}

/// Package name to package id, from the package selector of a dependents page.
pub fn parse_package_ids(html: &str) -> BTreeMap<String, String> {
    PACKAGE_OPTION
        .captures_iter(html)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().to_string();
            let name = caps.get(2)?.as_str().trim().to_string();
            Some((name, id))
        })
        .collect()
}

pub fn parse_dependents(html: &str) -> DependentCounts {
    let repositories = DEPENDENT_REPOSITORIES
        .captures(html)
        .and_then(|caps| caps.get(1))
        .and_then(|count| parse_count(count.as_str()))
        .unwrap_or(0);
    let packages = DEPENDENT_PACKAGES
        .captures(html)
        .and_then(|caps| caps.get(1))
        .and_then(|count| parse_count(count.as_str()))
        .unwrap_or(0);
    DependentCounts {
        repositories,
        packages,
    }
}
