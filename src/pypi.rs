use std::collections::BTreeSet;
use std::fs;
use std::sync::LazyLock;

use camino::Utf8Path;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::EcosystemError;
use crate::fs_util::write_bytes_atomic;
use crate::http::HttpClient;
use crate::source::{self, MetadataSource, Reducer, SourceField, max_value, resolve_as};
use crate::specifier::{Requirement, Specifier, Version, canonicalize_name};

const PYPI_BASE: &str = "https://pypi.org/pypi";
const PYPISTATS_BASE: &str = "https://pypistats.org/api/packages";

static PROJECT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").expect("static regex")
});
static PATH_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static regex"));

/// Attributes read from the project JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PypiField {
    Version,
    Summary,
    License,
    RequiresPython,
    LatestUpload,
    PackageType,
}

impl SourceField for PypiField {
    const ALL: &'static [Self] = &[
        PypiField::Version,
        PypiField::Summary,
        PypiField::License,
        PypiField::RequiresPython,
        PypiField::LatestUpload,
        PypiField::PackageType,
    ];

    fn name(self) -> &'static str {
        match self {
            PypiField::Version => "version",
            PypiField::Summary => "summary",
            PypiField::License => "license",
            PypiField::RequiresPython => "requires_python",
            PypiField::LatestUpload => "latest_upload",
            PypiField::PackageType => "package_type",
        }
    }

    fn path(self) -> &'static str {
        match self {
            PypiField::Version => "info.version",
            PypiField::Summary => "info.summary",
            PypiField::License => "info.license",
            PypiField::RequiresPython => "info.requires_python",
            PypiField::LatestUpload => "urls.upload_time_iso_8601",
            PypiField::PackageType => "urls.packagetype",
        }
    }

    fn transform(self, value: Value) -> Value {
        match self {
            PypiField::Summary | PypiField::License | PypiField::RequiresPython => {
                source::null_if_falsy(value)
            }
            _ => value,
        }
    }

    fn reducer(self) -> Option<Reducer> {
        match self {
            PypiField::LatestUpload => Some(max_value),
            _ => None,
        }
    }
}

/// Sparse serialized form of [`PyPIData`], keyed by project name in the member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PypiRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_qiskit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatible_qiskit_majors: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_month_downloads: Option<u64>,
}

pub trait PypiClient: Send + Sync {
    fn project(&self, name: &str) -> Result<Value, EcosystemError>;
    fn recent_downloads(&self, name: &str) -> Result<Value, EcosystemError>;
}

#[derive(Clone)]
pub struct PypiHttpClient {
    http: HttpClient,
}

impl PypiHttpClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

impl PypiClient for PypiHttpClient {
    fn project(&self, name: &str) -> Result<Value, EcosystemError> {
        self.http.get_json(&format!("{PYPI_BASE}/{name}/json"))
    }

    fn recent_downloads(&self, name: &str) -> Result<Value, EcosystemError> {
        self.http.get_json(&format!("{PYPISTATS_BASE}/{name}/recent"))
    }
}

/// A PyPI project published by a member.
#[derive(Debug, Clone, Default)]
pub struct PyPIData {
    project: String,
    fallbacks: Map<String, Value>,
    pypi_json: Option<Value>,
    downloads_json: Option<Value>,
    compatible_majors: Option<Vec<u64>>,
}

impl PartialEq for PyPIData {
    fn eq(&self, other: &Self) -> bool {
        self.project == other.project && self.to_record() == other.to_record()
    }
}

impl MetadataSource for PyPIData {
    type Field = PypiField;
    const KIND: &'static str = "PyPIData";

    fn cached_json(&self) -> Option<&Value> {
        self.pypi_json.as_ref()
    }

    fn fallbacks(&self) -> &Map<String, Value> {
        &self.fallbacks
    }
}

impl PyPIData {
    pub fn new(project: &str) -> Result<Self, EcosystemError> {
        if !PROJECT_NAME.is_match(project.trim()) {
            return Err(EcosystemError::InvalidPackageName(project.to_string()));
        }
        Ok(Self {
            project: canonicalize_name(project),
            ..Self::default()
        })
    }

    pub fn with_fallback(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fallbacks.insert(key.to_string(), value.into());
        self
    }

    /// `Ok(None)` when the url is not a PyPI url.
    pub fn from_url(url: &Url) -> Result<Option<Self>, EcosystemError> {
        let Some(host) = url.host_str() else {
            return Ok(None);
        };
        if !host.contains("pypi.org") {
            return Ok(None);
        }
        let parts: Vec<&str> = url
            .path()
            .split('/')
            .filter(|part| PATH_COMPONENT.is_match(part))
            .collect();
        match parts.as_slice() {
            [prefix, name] if prefix.eq_ignore_ascii_case("project") => {
                Self::new(&name.to_lowercase()).map(Some)
            }
            _ => Err(EcosystemError::InvalidSourceUrl {
                kind: "PyPI",
                url: url.to_string(),
            }),
        }
    }

    pub fn from_record(project: &str, record: &PypiRecord) -> Result<Self, EcosystemError> {
        let mut data = Self::new(project)?;
        data.fallbacks = source::fallbacks_from(record, &[])?;
        Ok(data)
    }

    pub fn to_record(&self) -> PypiRecord {
        PypiRecord {
            version: resolve_as(self, PypiField::Version).ok().flatten(),
            requires_qiskit: self.requires_qiskit(),
            compatible_qiskit_majors: self.compatible_qiskit_majors(),
            last_month_downloads: self.last_month_downloads(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn is_fetched(&self) -> bool {
        self.pypi_json.is_some()
    }

    /// Fetches the project JSON and the download counts.
    ///
    /// Both are best-effort: a failed lookup leaves that cache empty.
    pub fn update_json(&mut self, client: &dyn PypiClient) {
        match client.project(&self.project) {
            Ok(json) => self.pypi_json = Some(json),
            Err(err) => warn!(project = %self.project, error = %err, "PyPI project lookup failed"),
        }
        match client.recent_downloads(&self.project) {
            Ok(json) => self.downloads_json = Some(json),
            Err(err) => debug!(project = %self.project, error = %err, "download stats unavailable"),
        }
    }

    pub fn attribute(&self, name: &str) -> Result<Value, EcosystemError> {
        source::attribute(self, name)
    }

    pub fn version(&self) -> Result<Option<String>, EcosystemError> {
        resolve_as(self, PypiField::Version)
    }

    pub fn latest_upload(&self) -> Result<Option<String>, EcosystemError> {
        resolve_as(self, PypiField::LatestUpload)
    }

    /// Specifier of the `qiskit` requirement in `requires_dist`.
    ///
    /// A stored value wins over the fetched metadata. An empty specifier is
    /// widened to `>=0`.
    pub fn requires_qiskit(&self) -> Option<String> {
        if let Some(stored) = self.fallback("requires_qiskit").and_then(Value::as_str) {
            return Some(stored.to_string());
        }
        let requires_dist = self
            .pypi_json
            .as_ref()
            .and_then(|json| json.get("info"))
            .and_then(|info| info.get("requires_dist"))
            .and_then(Value::as_array)?;
        for entry in requires_dist.iter().filter_map(Value::as_str) {
            let requirement: Requirement = match entry.parse() {
                Ok(requirement) => requirement,
                Err(err) => {
                    debug!(project = %self.project, entry, error = %err, "skipping requirement");
                    continue;
                }
            };
            if requirement.name != "qiskit" {
                continue;
            }
            if requirement.specifier.is_empty() {
                warn!(
                    project = %self.project,
                    "depends on qiskit but with empty specifier, forcing \">=0\""
                );
                return Some(">=0".to_string());
            }
            return Some(requirement.specifier.to_string());
        }
        None
    }

    pub fn compatible_qiskit_majors(&self) -> Option<Vec<u64>> {
        self.compatible_majors.clone().or_else(|| {
            self.fallback("compatible_qiskit_majors")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
        })
    }

    /// Intersects `requires_qiskit` with the reference release table.
    pub fn update_compatibility(&mut self, table: &ReleaseTable) -> Result<(), EcosystemError> {
        let Some(requires) = self.requires_qiskit() else {
            return Ok(());
        };
        let specifier: Specifier = requires.parse()?;
        self.compatible_majors = Some(table.compatible_majors(&specifier));
        Ok(())
    }

    pub fn last_month_downloads(&self) -> Option<u64> {
        self.downloads_json
            .as_ref()
            .and_then(|json| json.get("data"))
            .and_then(|data| data.get("last_month"))
            .and_then(Value::as_u64)
            .or_else(|| {
                self.fallback("last_month_downloads")
                    .and_then(Value::as_u64)
            })
    }
}

/// Every published release of a reference package, cached on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseTable {
    pub package: String,
    pub fetched_at: DateTime<Utc>,
    pub releases: Vec<String>,
}

impl ReleaseTable {
    pub fn fetch(client: &dyn PypiClient, package: &str) -> Result<Self, EcosystemError> {
        let json = client.project(package)?;
        let releases = json
            .get("releases")
            .and_then(Value::as_object)
            .map(|releases| releases.keys().cloned().collect())
            .unwrap_or_default();
        Ok(Self {
            package: package.to_string(),
            fetched_at: Utc::now(),
            releases,
        })
    }

    pub fn load(path: &Utf8Path) -> Result<Option<Self>, EcosystemError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path()).map_err(EcosystemError::fs)?;
        let table = serde_json::from_str(&content).map_err(|err| EcosystemError::StoreCorrupt {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(Some(table))
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), EcosystemError> {
        let content = serde_json::to_vec_pretty(self).map_err(EcosystemError::serde)?;
        write_bytes_atomic(path, &content)
    }

    /// Uses the cached table while it is younger than `max_age`; otherwise
    /// refreshes it, falling back to a stale copy if the refresh fails.
    pub fn load_or_refresh(
        path: &Utf8Path,
        client: &dyn PypiClient,
        package: &str,
        max_age: ChronoDuration,
    ) -> Result<Self, EcosystemError> {
        let cached = Self::load(path)?.filter(|table| table.package == package);
        if let Some(table) = &cached {
            if Utc::now() - table.fetched_at < max_age {
                return Ok(table.clone());
            }
        }
        match Self::fetch(client, package) {
            Ok(table) => {
                info!(package, releases = table.releases.len(), "refreshed release table");
                table.save(path)?;
                Ok(table)
            }
            Err(err) => match cached {
                Some(table) => {
                    warn!(package, error = %err, "using stale release table");
                    Ok(table)
                }
                None => Err(err),
            },
        }
    }

    /// Major versions with at least one final release inside `specifier`.
    pub fn compatible_majors(&self, specifier: &Specifier) -> Vec<u64> {
        let majors: BTreeSet<u64> = self
            .releases
            .iter()
            .filter_map(|release| release.parse::<Version>().ok())
            .filter(|version| !version.is_prerelease())
            .filter(|version| specifier.contains(version))
            .map(|version| version.major())
            .collect();
        majors.into_iter().collect()
    }
}
