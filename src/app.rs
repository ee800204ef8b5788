use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::dao::Dao;
use crate::domain::NameId;
use crate::error::EcosystemError;
use crate::fs_util::write_bytes_atomic;
use crate::github::GithubClient;
use crate::julia::JuliaClient;
use crate::labels::LabelsToml;
use crate::member::Member;
use crate::pypi::{PypiClient, ReleaseTable};
use crate::shortener::{LinkShortener, badge_endpoint};
use crate::submission::{LabelMap, parse_submission_with};
use crate::validation::{ValidationReport, default_validators, validate_member};

#[derive(Debug, Clone, Serialize)]
pub struct AddResult {
    pub name_id: String,
    pub action: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshFailure {
    pub name_id: String,
    pub error: String,
}

/// Outcome of a batch operation. One member failing never aborts the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, name_id: &NameId, outcome: Result<bool, EcosystemError>) {
        match outcome {
            Ok(true) => self.updated.push(name_id.to_string()),
            Ok(false) => self.unchanged.push(name_id.to_string()),
            Err(err) => {
                warn!(%name_id, error = %err, "member update failed");
                self.failed.push(RefreshFailure {
                    name_id: name_id.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompileResult {
    pub path: String,
    pub members: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BadgeEndpointsResult {
    pub dir: String,
    pub written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub reports: Vec<ValidationReport>,
}

impl ValidateResult {
    pub fn is_valid(&self) -> bool {
        self.reports.iter().all(ValidationReport::is_valid)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<G: GithubClient, P: PypiClient, J: JuliaClient> {
    dao: Dao,
    github: G,
    pypi: P,
    julia: J,
}

impl<G: GithubClient, P: PypiClient, J: JuliaClient> App<G, P, J> {
    pub fn new(dao: Dao, github: G, pypi: P, julia: J) -> Self {
        Self {
            dao,
            github,
            pypi,
            julia,
        }
    }

    pub fn dao(&self) -> &Dao {
        &self.dao
    }

    /// Parses a submission issue and upserts the member.
    ///
    /// A submission for a url already in the directory keeps the stored
    /// identity, badge and fetched metadata.
    pub fn add_from_issue(
        &self,
        body: &str,
        labels: &LabelMap,
        sink: &dyn ProgressSink,
    ) -> Result<AddResult, EcosystemError> {
        sink.event(ProgressEvent {
            message: "phase=Parse; reading submission".to_string(),
            elapsed: None,
        });
        let submission = parse_submission_with(body, labels)?;
        let mut member = Member::from_submission(submission)?;

        let existing = match member.url.as_deref() {
            Some(url) => self.dao.get_by_url(url)?,
            None => None,
        };
        let previous = match existing {
            Some(existing) => {
                let previous = existing.name_id();
                member.uuid = existing.uuid;
                member.badge = existing.badge;
                member.created_at = existing.created_at;
                member.github = existing.github.or(member.github);
                member.julia = existing.julia.or(member.julia);
                for (project, data) in existing.pypi {
                    member.pypi.insert(project, data);
                }
                Some(previous)
            }
            None => None,
        };
        let action = if previous.is_some() { "updated" } else { "added" };
        member.touch();

        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {}", member.name_id()),
            elapsed: None,
        });
        let url = member.url.clone();
        let name_id = match &previous {
            Some(previous) => self.dao.replace(previous, member)?,
            None => self.dao.write(member)?,
        };
        info!(%name_id, action, "stored submission");
        Ok(AddResult {
            name_id: name_id.to_string(),
            action: action.to_string(),
            url,
        })
    }

    pub fn refresh_github(&self, sink: &dyn ProgressSink) -> Result<RefreshReport, EcosystemError> {
        self.refresh_each("github", sink, |member| member.update_github(&self.github).map(|_| ()))
    }

    /// Refreshes PyPI metadata. With a release table, also recomputes compatibility.
    pub fn refresh_pypi(
        &self,
        releases: Option<&ReleaseTable>,
        sink: &dyn ProgressSink,
    ) -> Result<RefreshReport, EcosystemError> {
        self.refresh_each("pypi", sink, |member| member.update_pypi(&self.pypi, releases))
    }

    pub fn refresh_julia(&self, sink: &dyn ProgressSink) -> Result<RefreshReport, EcosystemError> {
        self.refresh_each("julia", sink, |member| {
            member.update_julia(&self.julia);
            Ok(())
        })
    }

    /// Loads the reference release table, refreshing it when stale.
    pub fn release_table(
        &self,
        path: &Utf8Path,
        package: &str,
        max_age: chrono::Duration,
    ) -> Result<ReleaseTable, EcosystemError> {
        ReleaseTable::load_or_refresh(path, &self.pypi, package, max_age)
    }

    pub fn mint_badges(
        &self,
        shortener: &dyn LinkShortener,
        sink: &dyn ProgressSink,
    ) -> Result<RefreshReport, EcosystemError> {
        let mut report = RefreshReport::default();
        for member in self.dao.get_all()? {
            let name_id = member.name_id();
            if member.badge.is_some() {
                report.unchanged.push(name_id.to_string());
                continue;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Badge; minting {name_id}"),
                elapsed: None,
            });
            let outcome = self.dao.update(&name_id, |member| {
                let minted = member.update_badge(shortener)?;
                if minted {
                    member.touch();
                }
                Ok(minted)
            });
            report.record(&name_id, outcome);
        }
        Ok(report)
    }

    /// Writes one shields.io endpoint JSON per member, named by its short uuid.
    pub fn write_badge_endpoints(
        &self,
        dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<BadgeEndpointsResult, EcosystemError> {
        let members = self.dao.get_all()?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {} badge endpoints", members.len()),
            elapsed: None,
        });
        for member in &members {
            let content = serde_json::to_vec(&badge_endpoint(&member.name))
                .map_err(EcosystemError::serde)?;
            write_bytes_atomic(&dir.join(member.short_uuid()), &content)?;
        }
        Ok(BadgeEndpointsResult {
            dir: dir.to_string(),
            written: members.len(),
        })
    }

    pub fn compile_json(
        &self,
        path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<CompileResult, EcosystemError> {
        let start = Instant::now();
        let members = self.dao.compile_json(path)?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; compiled {members} members"),
            elapsed: Some(start.elapsed()),
        });
        Ok(CompileResult {
            path: path.to_string(),
            members,
        })
    }

    pub fn validate(&self, vocabulary: &LabelsToml) -> Result<ValidateResult, EcosystemError> {
        let validators = default_validators(vocabulary);
        let reports = self
            .dao
            .get_all()?
            .iter()
            .map(|member| validate_member(member, &validators))
            .collect();
        Ok(ValidateResult { reports })
    }

    /// Applies `refresh` to every member, persisting each one separately.
    fn refresh_each(
        &self,
        upstream: &str,
        sink: &dyn ProgressSink,
        refresh: impl Fn(&mut Member) -> Result<(), EcosystemError>,
    ) -> Result<RefreshReport, EcosystemError> {
        let mut report = RefreshReport::default();
        let start = Instant::now();
        for member in self.dao.get_all()? {
            let name_id = member.name_id();
            sink.event(ProgressEvent {
                message: format!("{upstream}.request {name_id}"),
                elapsed: None,
            });
            let outcome = self.dao.update(&name_id, |member| {
                let before = member.to_record()?;
                refresh(member)?;
                let changed = member.to_record()? != before;
                if changed {
                    member.touch();
                }
                Ok(changed)
            });
            report.record(&name_id, outcome);
        }
        sink.event(ProgressEvent {
            message: format!(
                "{upstream}.done updated={} unchanged={} failed={}",
                report.updated.len(),
                report.unchanged.len(),
                report.failed.len()
            ),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }
}
