use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::sync::{Arc, LazyLock, Mutex};

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::EcosystemError;
use crate::http::HttpClient;
use crate::source::{self, MetadataSource, SourceField, null_if_falsy, resolve_as};

const JULIAHUB_BASE: &str = "https://juliahub.com";
const GENERAL_REGISTRY_TOML: &str =
    "https://raw.githubusercontent.com/JuliaRegistries/General/refs/heads/master/Registry.toml";
const GENERAL_REGISTRY_TREE: &str = "https://github.com/JuliaRegistries/General/tree/master";
const PACKAGE_REQUESTS_CSV: &str =
    "https://julialang-logs.s3.amazonaws.com/public_outputs/current/package_requests.csv.gz";
pub const DEFAULT_REGISTRY: &str = "General";

static JULIAPACKAGES_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title>\s*([A-Za-z][A-Za-z0-9_]*)(?:\.jl)?\b").expect("static regex")
});
static JULIAPACKAGES_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<h1[^>]*>\s*(?:<[^>]+>\s*)*([A-Za-z][A-Za-z0-9_]*)\.jl").expect("static regex")
});

/// Attributes read from the juliahub `pkg.json` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JuliaField {
    Version,
    License,
    Owner,
    Homepage,
    ReleaseDate,
    Uuid,
}

impl SourceField for JuliaField {
    const ALL: &'static [Self] = &[
        JuliaField::Version,
        JuliaField::License,
        JuliaField::Owner,
        JuliaField::Homepage,
        JuliaField::ReleaseDate,
        JuliaField::Uuid,
    ];

    fn name(self) -> &'static str {
        match self {
            JuliaField::Version => "version",
            JuliaField::License => "license",
            JuliaField::Owner => "owner",
            JuliaField::Homepage => "homepage",
            JuliaField::ReleaseDate => "release_date",
            JuliaField::Uuid => "uuid",
        }
    }

    fn path(self) -> &'static str {
        self.name()
    }

    fn transform(self, value: Value) -> Value {
        match self {
            JuliaField::Homepage => null_if_falsy(value),
            JuliaField::ReleaseDate => parse_release_date(value),
            _ => value,
        }
    }
}

/// `"Mar 2024"` becomes `"2024-03-01"`; anything else is kept as-is.
fn parse_release_date(value: Value) -> Value {
    let Some(text) = value.as_str() else {
        return value;
    };
    match NaiveDate::parse_from_str(&format!("01 {}", text.trim()), "%d %b %Y") {
        Ok(date) => Value::from(date.format("%Y-%m-%d").to_string()),
        Err(_) => value,
    }
}

/// Sparse serialized form of [`JuliaData`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JuliaRecord {
    /// Empty until a juliapackages.com source has been resolved.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub package_name: String,
    #[serde(default = "default_registry")]
    pub registry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub juliapackages_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub juliahub_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_registry_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_unique_users: Option<u64>,
}

fn default_registry() -> String {
    DEFAULT_REGISTRY.to_string()
}

pub trait JuliaClient: Send + Sync {
    fn package_json(&self, registry: &str, package: &str) -> Result<Value, EcosystemError>;
    fn page_exists(&self, url: &str) -> Result<bool, EcosystemError>;
    fn general_registry(&self) -> Result<String, EcosystemError>;
    /// HTML of a `juliapackages.com/p/<name>` page.
    fn juliapackages_page(&self, url: &str) -> Result<String, EcosystemError>;
    /// Gzipped CSV of per-package download requests.
    fn package_requests(&self) -> Result<Arc<Vec<u8>>, EcosystemError>;
}

pub struct JuliaHttpClient {
    http: HttpClient,
    package_requests: Mutex<Option<Arc<Vec<u8>>>>,
}

impl JuliaHttpClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            package_requests: Mutex::new(None),
        }
    }
}

impl JuliaClient for JuliaHttpClient {
    fn package_json(&self, registry: &str, package: &str) -> Result<Value, EcosystemError> {
        self.http.get_json(&format!(
            "{JULIAHUB_BASE}/docs/{registry}/{package}/stable/pkg.json"
        ))
    }

    fn page_exists(&self, url: &str) -> Result<bool, EcosystemError> {
        self.http.exists(url)
    }

    fn general_registry(&self) -> Result<String, EcosystemError> {
        self.http.get_text(GENERAL_REGISTRY_TOML)
    }

    fn juliapackages_page(&self, url: &str) -> Result<String, EcosystemError> {
        self.http.get_text(url)
    }

    fn package_requests(&self) -> Result<Arc<Vec<u8>>, EcosystemError> {
        let mut slot = self
            .package_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(bytes) = slot.as_ref() {
            return Ok(Arc::clone(bytes));
        }
        let bytes = Arc::new(self.http.get_bytes(PACKAGE_REQUESTS_CSV)?);
        *slot = Some(Arc::clone(&bytes));
        Ok(bytes)
    }
}

/// A Julia package published by a member.
#[derive(Debug, Clone, Default)]
pub struct JuliaData {
    pub package_name: String,
    pub registry: String,
    juliapackages_url: Option<String>,
    fallbacks: Map<String, Value>,
    juliahub_json: Option<Value>,
    juliahub_url: Option<String>,
    general_registry_url: Option<String>,
    package_requests: Option<BTreeMap<String, String>>,
}

impl PartialEq for JuliaData {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_record(), other.to_record()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }
}

impl MetadataSource for JuliaData {
    type Field = JuliaField;
    const KIND: &'static str = "JuliaData";

    fn cached_json(&self) -> Option<&Value> {
        self.juliahub_json.as_ref()
    }

    fn fallbacks(&self) -> &Map<String, Value> {
        &self.fallbacks
    }
}

impl JuliaData {
    pub fn new(package_name: impl Into<String>, registry: Option<&str>) -> Self {
        Self {
            package_name: package_name.into(),
            registry: registry
                .filter(|registry| !registry.is_empty())
                .unwrap_or(DEFAULT_REGISTRY)
                .to_string(),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fallbacks.insert(key.to_string(), value.into());
        self
    }

    /// A source whose package name is scraped from a juliapackages.com page
    /// on the next [`update_json`](Self::update_json).
    pub fn pending(juliapackages_url: impl Into<String>) -> Self {
        Self {
            juliapackages_url: Some(juliapackages_url.into()),
            ..Self::new(String::new(), None)
        }
    }

    /// Recognizes `juliahub.com/ui/Packages/<registry>/<package>` and
    /// `juliapackages.com/p/<package>`.
    pub fn from_url(url: &Url) -> Result<Option<Self>, EcosystemError> {
        let Some(host) = url.host_str() else {
            return Ok(None);
        };
        let parts: Vec<&str> = url
            .path()
            .split('/')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if host.contains("juliahub.com") {
            return match parts.as_slice() {
                ["ui", "Packages", registry, package] => {
                    Ok(Some(Self::new(*package, Some(*registry))))
                }
                _ => Err(EcosystemError::InvalidSourceUrl {
                    kind: "JuliaHub",
                    url: url.to_string(),
                }),
            };
        }
        if host.contains("juliapackages.com") {
            return match parts.as_slice() {
                ["p", _] => Ok(Some(Self::pending(url.as_str()))),
                _ => Err(EcosystemError::InvalidSourceUrl {
                    kind: "juliapackages.com",
                    url: url.to_string(),
                }),
            };
        }
        Ok(None)
    }

    pub fn from_record(record: &JuliaRecord) -> Result<Self, EcosystemError> {
        let mut data = Self::new(record.package_name.clone(), Some(&record.registry));
        data.juliapackages_url = record.juliapackages_url.clone();
        data.fallbacks = source::fallbacks_from(
            record,
            &["package_name", "registry", "juliapackages_url"],
        )?;
        Ok(data)
    }

    pub fn to_record(&self) -> Result<JuliaRecord, EcosystemError> {
        let mut map = Map::new();
        map.insert("package_name".to_string(), Value::from(self.package_name.clone()));
        map.insert("registry".to_string(), Value::from(self.registry.clone()));
        if let Some(url) = &self.juliapackages_url {
            map.insert("juliapackages_url".to_string(), Value::from(url.clone()));
        }
        source::collect_fields(self, &mut map)?;
        if let Some(url) = self.juliahub_url() {
            map.insert("juliahub_url".to_string(), Value::from(url));
        }
        if let Some(url) = self.general_registry_url() {
            map.insert("general_registry_url".to_string(), Value::from(url));
        }
        if let Some(users) = self.estimated_unique_users() {
            map.insert("estimated_unique_users".to_string(), Value::from(users));
        }
        serde_json::from_value(Value::Object(map)).map_err(EcosystemError::serde)
    }

    pub fn is_fetched(&self) -> bool {
        self.juliahub_json.is_some()
    }

    /// True while the package name still has to be scraped.
    pub fn is_pending(&self) -> bool {
        self.package_name.is_empty()
    }

    pub fn juliapackages_url(&self) -> Option<&str> {
        self.juliapackages_url.as_deref()
    }

    /// Refreshes every Julia lookup. Each one is best-effort.
    ///
    /// A pending juliapackages.com source is resolved first and then looked
    /// up in the General registry; if the name cannot be scraped nothing
    /// else is fetched.
    pub fn update_json(&mut self, client: &dyn JuliaClient) {
        if self.is_pending() && !self.resolve_juliapackages(client) {
            return;
        }
        match client.package_json(&self.registry, &self.package_name) {
            Ok(json) => {
                self.juliahub_json = Some(json);
                self.update_juliahub_url(client);
            }
            Err(err) => {
                warn!(package = %self.package_name, error = %err, "juliahub metadata unavailable")
            }
        }

        if let Ok(Some(uuid)) = resolve_as::<_, String>(self, JuliaField::Uuid) {
            match self.lookup_package_requests(client, &uuid) {
                Ok(row) => self.package_requests = row,
                Err(err) => {
                    warn!(package = %self.package_name, error = %err, "download stats unavailable")
                }
            }
        }

        if let Err(err) = self.update_general_registry_url(client) {
            warn!(package = %self.package_name, error = %err, "General registry lookup failed");
        }
    }

    fn resolve_juliapackages(&mut self, client: &dyn JuliaClient) -> bool {
        let Some(url) = self.juliapackages_url.clone() else {
            warn!("julia source has neither a package name nor a juliapackages.com url");
            return false;
        };
        let name = client
            .juliapackages_page(&url)
            .and_then(|html| parse_juliapackages(&html, &url));
        match name {
            Ok(name) => {
                debug!(url = %url, package = %name, "resolved juliapackages.com source");
                self.package_name = name;
                self.registry = DEFAULT_REGISTRY.to_string();
                true
            }
            Err(err) => {
                warn!(url = %url, error = %err, "juliapackages.com page unavailable");
                false
            }
        }
    }

    fn update_juliahub_url(&mut self, client: &dyn JuliaClient) {
        let url = format!(
            "{JULIAHUB_BASE}/ui/Packages/{}/{}",
            self.registry, self.package_name
        );
        self.juliahub_url = match client.page_exists(&url) {
            Ok(true) => Some(url),
            Ok(false) => None,
            Err(err) => {
                debug!(url = %url, error = %err, "juliahub page check failed");
                None
            }
        };
    }

    fn lookup_package_requests(
        &self,
        client: &dyn JuliaClient,
        uuid: &str,
    ) -> Result<Option<BTreeMap<String, String>>, EcosystemError> {
        let bytes = client.package_requests()?;
        find_first_in_csv_gz(
            &bytes,
            &[
                ("package_uuid", uuid),
                ("status", "200"),
                ("client_type", "user"),
            ],
        )
    }

    fn update_general_registry_url(
        &mut self,
        client: &dyn JuliaClient,
    ) -> Result<(), EcosystemError> {
        if self.registry != DEFAULT_REGISTRY {
            return Ok(());
        }
        let manifest = client.general_registry()?;
        let Some(dirname) = registry_path(&manifest, &self.package_name)? else {
            return Ok(());
        };
        let url = format!("{GENERAL_REGISTRY_TREE}/{dirname}");
        self.general_registry_url = client.page_exists(&url)?.then_some(url);
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Result<Value, EcosystemError> {
        source::attribute(self, name)
    }

    pub fn version(&self) -> Result<Option<String>, EcosystemError> {
        resolve_as(self, JuliaField::Version)
    }

    pub fn juliahub_url(&self) -> Option<String> {
        self.juliahub_url.clone().or_else(|| self.fallback_str("juliahub_url"))
    }

    pub fn general_registry_url(&self) -> Option<String> {
        self.general_registry_url
            .clone()
            .or_else(|| self.fallback_str("general_registry_url"))
    }

    /// Distinct addresses requesting the package, per the public download logs.
    pub fn estimated_unique_users(&self) -> Option<u64> {
        match &self.package_requests {
            Some(row) => row.get("request_addrs").and_then(|value| value.parse().ok()),
            None => self
                .fallback("estimated_unique_users")
                .and_then(Value::as_u64),
        }
    }

    fn fallback_str(&self, key: &str) -> Option<String> {
        self.fallback(key).and_then(Value::as_str).map(str::to_string)
    }
}

/// Package name shown on a juliapackages.com page, without the `.jl` suffix.
pub fn parse_juliapackages(html: &str, url: &str) -> Result<String, EcosystemError> {
    JULIAPACKAGES_HEADING
        .captures(html)
        .or_else(|| JULIAPACKAGES_TITLE.captures(html))
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .ok_or_else(|| EcosystemError::InvalidSourceUrl {
            kind: "juliapackages.com",
            url: url.to_string(),
        })
}

/// Directory of `package` inside the General registry, from `Registry.toml`.
pub fn registry_path(manifest: &str, package: &str) -> Result<Option<String>, EcosystemError> {
    let registry: toml::Table = toml::from_str(manifest).map_err(EcosystemError::serde)?;
    let Some(packages) = registry.get("packages").and_then(toml::Value::as_table) else {
        return Ok(None);
    };
    Ok(packages.values().find_map(|entry| {
        let name = entry.get("name").and_then(toml::Value::as_str)?;
        if name != package {
            return None;
        }
        entry
            .get("path")
            .and_then(toml::Value::as_str)
            .map(str::to_string)
    }))
}

/// First row of a gzipped CSV whose columns equal every filter value.
pub fn find_first_in_csv_gz(
    bytes: &[u8],
    filters: &[(&str, &str)],
) -> Result<Option<BTreeMap<String, String>>, EcosystemError> {
    let reader = BufReader::new(GzDecoder::new(bytes));
    let mut lines = reader.lines();
    let Some(header) = lines.next() else {
        return Ok(None);
    };
    let header: Vec<String> = split_csv_line(&header.map_err(EcosystemError::serde)?);
    for line in lines {
        let line = line.map_err(EcosystemError::serde)?;
        let values = split_csv_line(&line);
        let row: BTreeMap<String, String> = header.iter().cloned().zip(values).collect();
        let matches = filters
            .iter()
            .all(|(column, expected)| row.get(*column).map(String::as_str) == Some(*expected));
        if matches {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}
