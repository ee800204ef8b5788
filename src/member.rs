use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{NameId, normalize_url, parse_url, short_uuid};
use crate::error::EcosystemError;
use crate::github::{GitHubData, GithubClient, GithubRecord};
use crate::julia::{JuliaClient, JuliaData, JuliaRecord};
use crate::pypi::{PyPIData, PypiClient, PypiRecord, ReleaseTable};
use crate::shortener::LinkShortener;
use crate::submission::Submission;

/// One entry of the directory.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub licence: Option<String>,
    pub contact_info: Option<String>,
    pub affiliations: Option<String>,
    pub labels: BTreeSet<String>,
    pub ibm_maintained: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub website: Option<String>,
    pub group: Option<String>,
    pub reference_paper: Option<String>,
    pub documentation: Option<String>,
    pub packages: Vec<String>,
    pub uuid: String,
    pub badge: Option<String>,
    pub github: Option<GitHubData>,
    pub pypi: BTreeMap<String, PyPIData>,
    pub julia: Option<JuliaData>,
}

/// Members are the same entry when they point at the same code with the same
/// description and licence.
impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.description == other.description
            && self.licence == other.licence
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "Member({} | {url})", self.name),
            None => write!(f, "Member({})", self.name),
        }
    }
}

/// Serialized form of a [`Member`], as stored in `<name_id>.toml`.
///
/// Scalars come first so that the TOML encoder can emit the nested source
/// tables after them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliations: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ibm_maintained: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, alias = "category", skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_paper: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub julia: Option<JuliaRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pypi: BTreeMap<String, PypiRecord>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Member {
    /// Creates a member with a fresh uuid, discovering its GitHub source from `url`.
    pub fn new(name: impl Into<String>, url: Option<&str>) -> Result<Self, EcosystemError> {
        let url = url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(normalize_url)
            .transpose()?;
        let github = match &url {
            Some(url) => GitHubData::from_url(&parse_url(url)?)?,
            None => None,
        };
        let now = Utc::now();
        Ok(Self {
            name: name.into(),
            url,
            description: None,
            licence: None,
            contact_info: None,
            affiliations: None,
            labels: BTreeSet::new(),
            ibm_maintained: false,
            created_at: Some(now),
            updated_at: Some(now),
            website: None,
            group: None,
            reference_paper: None,
            documentation: None,
            packages: Vec::new(),
            uuid: Uuid::new_v4().to_string(),
            badge: None,
            github,
            pypi: BTreeMap::new(),
            julia: None,
        })
    }

    pub fn from_submission(submission: Submission) -> Result<Self, EcosystemError> {
        let mut member = Self::new(submission.name, submission.url.as_deref())?;
        member.description = submission.description;
        member.licence = submission.licence;
        member.contact_info = submission.contact_info;
        member.affiliations = submission.affiliations;
        member.labels = submission.labels.into_iter().collect();
        member.ibm_maintained = submission.ibm_maintained;
        member.website = submission.website;
        member.group = submission.group;
        member.reference_paper = submission.reference_paper;
        member.documentation = submission.documentation;
        member.packages = submission.packages;
        member.discover_packages()?;
        Ok(member)
    }

    pub fn short_uuid(&self) -> &str {
        short_uuid(&self.uuid)
    }

    pub fn name_id(&self) -> NameId {
        NameId::derive(&self.name, &self.uuid)
    }

    /// Markdown snippet embedding the badge, once minted.
    pub fn badge_md(&self) -> Option<String> {
        self.badge
            .as_ref()
            .map(|badge| format!("[![Qiskit Ecosystem]({badge})](https://qisk.it/e)"))
    }

    /// Builds the PyPI and Julia sources declared in `packages`.
    ///
    /// Existing sources are kept, so their stored values survive.
    pub fn discover_packages(&mut self) -> Result<(), EcosystemError> {
        for package in &self.packages {
            let url = parse_url(package)?;
            if let Some(pypi) = PyPIData::from_url(&url)? {
                self.pypi.entry(pypi.project().to_string()).or_insert(pypi);
            } else if let Some(julia) = JuliaData::from_url(&url)? {
                if self.julia.is_none() {
                    self.julia = Some(julia);
                }
            } else {
                debug!(member = %self.name, package, "package url has no known registry");
            }
        }
        Ok(())
    }

    pub fn from_record(record: MemberRecord) -> Result<Self, EcosystemError> {
        let github = match &record.github {
            Some(github) => Some(GitHubData::from_record(github)?),
            None => record.url.as_deref().and_then(discover_github),
        };
        let julia = record.julia.as_ref().map(JuliaData::from_record).transpose()?;
        let pypi = record
            .pypi
            .iter()
            .map(|(project, pypi)| {
                let data = PyPIData::from_record(project, pypi)?;
                Ok((data.project().to_string(), data))
            })
            .collect::<Result<BTreeMap<_, _>, EcosystemError>>()?;

        let uuid = match record.uuid {
            Some(uuid) => uuid,
            None => legacy_uuid(&record.name, record.url.as_deref()),
        };
        let now = Utc::now();
        Ok(Self {
            name: record.name,
            url: record.url,
            description: record.description,
            licence: record.licence,
            contact_info: record.contact_info,
            affiliations: record.affiliations,
            labels: record.labels,
            ibm_maintained: record.ibm_maintained,
            created_at: record.created_at.or(Some(now)),
            updated_at: record.updated_at.or(Some(now)),
            website: record.website,
            group: record.group,
            reference_paper: record.reference_paper,
            documentation: record.documentation,
            packages: record.packages,
            uuid,
            badge: record.badge,
            github,
            pypi,
            julia,
        })
    }

    pub fn to_record(&self) -> Result<MemberRecord, EcosystemError> {
        Ok(MemberRecord {
            name: self.name.clone(),
            url: self.url.clone(),
            description: self.description.clone(),
            licence: self.licence.clone(),
            contact_info: self.contact_info.clone(),
            affiliations: self.affiliations.clone(),
            labels: self.labels.clone(),
            ibm_maintained: self.ibm_maintained,
            created_at: self.created_at,
            updated_at: self.updated_at,
            website: self.website.clone(),
            group: self.group.clone(),
            reference_paper: self.reference_paper.clone(),
            documentation: self.documentation.clone(),
            packages: self.packages.clone(),
            uuid: Some(self.uuid.clone()),
            badge: self.badge.clone(),
            github: self.github.as_ref().map(GitHubData::to_record).transpose()?,
            julia: self.julia.as_ref().map(JuliaData::to_record).transpose()?,
            pypi: self
                .pypi
                .iter()
                .map(|(project, data)| (project.clone(), data.to_record()))
                .collect(),
        })
    }

    /// Refreshes the GitHub source and follows renames.
    ///
    /// Returns `false` when the member has no GitHub source.
    pub fn update_github(&mut self, client: &dyn GithubClient) -> Result<bool, EcosystemError> {
        let Some(github) = self.github.as_mut() else {
            return Ok(false);
        };
        github.update_json(client)?;
        if github.update_owner_repo(client)? {
            info!(member = %self.name, "GitHub repository was renamed");
        }
        Ok(true)
    }

    /// Refreshes every PyPI source, then recomputes compatibility against `releases`.
    pub fn update_pypi(
        &mut self,
        client: &dyn PypiClient,
        releases: Option<&ReleaseTable>,
    ) -> Result<(), EcosystemError> {
        for data in self.pypi.values_mut() {
            data.update_json(client);
            if let Some(table) = releases {
                if let Err(err) = data.update_compatibility(table) {
                    warn!(project = data.project(), error = %err, "cannot compute compatibility");
                }
            }
        }
        Ok(())
    }

    pub fn update_julia(&mut self, client: &dyn JuliaClient) {
        if let Some(julia) = self.julia.as_mut() {
            julia.update_json(client);
        }
    }

    /// Mints the badge link. Does nothing when one already exists.
    pub fn update_badge(&mut self, shortener: &dyn LinkShortener) -> Result<bool, EcosystemError> {
        if self.badge.is_some() {
            return Ok(false);
        }
        let link = shortener.shorten_badge(&self.name, self.short_uuid())?;
        self.badge = Some(link);
        Ok(true)
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

fn discover_github(url: &str) -> Option<GitHubData> {
    match parse_url(url).and_then(|url| GitHubData::from_url(&url)) {
        Ok(github) => github,
        Err(err) => {
            debug!(url, error = %err, "no GitHub source for stored url");
            None
        }
    }
}

/// Identity for a record stored without a uuid. Derived from name and url
/// so every read of the same file yields the same member.
fn legacy_uuid(name: &str, url: Option<&str>) -> String {
    let key = format!("{name}\n{}", url.unwrap_or_default());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_url_and_discovers_github() {
        let member = Member::new("Qiskit Demo", Some("github.com/Qiskit/demo/")).unwrap();
        assert_eq!(member.url.as_deref(), Some("https://github.com/Qiskit/demo"));
        let github = member.github.as_ref().unwrap();
        assert_eq!((github.owner.as_str(), github.repo.as_str()), ("Qiskit", "demo"));
    }

    #[test]
    fn equality_ignores_identity() {
        let mut left = Member::new("A", Some("https://example.org/a")).unwrap();
        let mut right = Member::new("B", Some("https://example.org/a")).unwrap();
        left.description = Some("same".to_string());
        right.description = Some("same".to_string());
        assert_eq!(left, right);
        right.licence = Some("MIT".to_string());
        assert_ne!(left, right);
    }

    #[test]
    fn packages_become_sources() {
        let mut member = Member::new("Pkgs", None).unwrap();
        member.packages = vec![
            "https://pypi.org/project/Qiskit_Nature".to_string(),
            "https://juliahub.com/ui/Packages/General/Example".to_string(),
            "https://example.org/elsewhere".to_string(),
        ];
        member.discover_packages().unwrap();
        assert!(member.pypi.contains_key("qiskit-nature"));
        assert_eq!(member.julia.as_ref().unwrap().package_name, "Example");
    }

    #[test]
    fn juliapackages_url_becomes_pending_source() {
        let mut member = Member::new("Jl", None).unwrap();
        member.packages = vec!["https://juliapackages.com/p/example".to_string()];
        member.discover_packages().unwrap();
        let julia = member.julia.as_ref().unwrap();
        assert!(julia.is_pending());
        assert_eq!(julia.juliapackages_url(), Some("https://juliapackages.com/p/example"));
    }

    #[test]
    fn badge_markdown_needs_a_badge() {
        let mut member = Member::new("Badge", None).unwrap();
        assert_eq!(member.badge_md(), None);
        member.badge = Some("https://qisk.it/e-1".to_string());
        assert_eq!(
            member.badge_md().as_deref(),
            Some("[![Qiskit Ecosystem](https://qisk.it/e-1)](https://qisk.it/e)")
        );
    }
}
