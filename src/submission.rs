//! Parses the markdown body of a submission issue.
//!
//! Issue forms render every field as a `### <label>` heading followed by the
//! submitted text. Labels are mapped to field ids through a [`LabelMap`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::parse_url;
use crate::error::EcosystemError;

const NO_RESPONSE: &str = "_No response_";

/// What a user submitted through the issue form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub licence: Option<String>,
    pub contact_info: Option<String>,
    pub affiliations: Option<String>,
    pub labels: Vec<String>,
    pub ibm_maintained: bool,
    pub website: Option<String>,
    pub group: Option<String>,
    pub reference_paper: Option<String>,
    pub documentation: Option<String>,
    pub packages: Vec<String>,
}

/// Heading label to field id.
#[derive(Debug, Clone)]
pub struct LabelMap(BTreeMap<String, String>);

impl Default for LabelMap {
    fn default() -> Self {
        let entries = [
            ("Name", "name"),
            ("Project name", "name"),
            ("Source code URL", "url"),
            ("Repository URL", "url"),
            ("Description", "description"),
            ("License", "licence"),
            ("Licence", "licence"),
            ("Contact info", "contact_info"),
            ("Email", "contact_info"),
            ("Affiliations", "affiliations"),
            ("Labels", "labels"),
            ("Tags", "labels"),
            ("Website", "website"),
            ("Homepage URL", "website"),
            ("Category", "group"),
            ("Paper URL", "reference_paper"),
            ("Reference paper", "reference_paper"),
            ("Documentation URL", "documentation"),
            ("Documentation", "documentation"),
            ("Packages", "packages"),
            ("Package URLs", "packages"),
        ];
        Self(
            entries
                .into_iter()
                .map(|(label, id)| (label.to_string(), id.to_string()))
                .collect(),
        )
    }
}

impl LabelMap {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    pub fn field_id(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }
}

pub fn parse_submission(body: &str) -> Result<Submission, EcosystemError> {
    parse_submission_with(body, &LabelMap::default())
}

pub fn parse_submission_with(body: &str, labels: &LabelMap) -> Result<Submission, EcosystemError> {
    let mut fields: BTreeMap<&str, Option<String>> = BTreeMap::new();
    for section in body.replace("\r\n", "\n").split("### ").skip(1) {
        let mut lines = section.lines();
        let label = lines.next().unwrap_or_default().trim();
        let content = lines
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let id = labels.field_id(label).ok_or_else(|| {
            EcosystemError::SubmissionParse(format!("unknown field label '{label}'"))
        })?;
        let value = (!content.is_empty() && content != NO_RESPONSE).then_some(content);
        debug!(label, id, "parsed submission field");
        fields.insert(id, value);
    }

    let mut take = |id: &str| fields.remove(id).flatten();
    let name = take("name")
        .ok_or_else(|| EcosystemError::SubmissionParse("missing project name".to_string()))?;
    let url = take("url");
    let contact_info = take("contact_info");
    let labels = take("labels")
        .map(|labels| split_list(&labels, &[',']))
        .unwrap_or_default();
    let packages = take("packages")
        .map(|packages| split_list(&packages, &[',', ' ']))
        .unwrap_or_default();
    let ibm_maintained = is_ibm_maintained(contact_info.as_deref(), url.as_deref());

    Ok(Submission {
        name,
        url,
        description: take("description"),
        licence: take("licence"),
        contact_info,
        affiliations: take("affiliations"),
        labels,
        ibm_maintained,
        website: take("website"),
        group: take("group"),
        reference_paper: take("reference_paper"),
        documentation: take("documentation"),
        packages,
    })
}

fn split_list(value: &str, separators: &[char]) -> Vec<String> {
    value
        .split(|ch| separators.contains(&ch))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Maintained by IBM when the contact is an IBMer or the code lives in the Qiskit org.
fn is_ibm_maintained(contact_info: Option<&str>, url: Option<&str>) -> bool {
    if contact_info.is_some_and(|contact| contact.trim().ends_with("ibm.com")) {
        return true;
    }
    url.and_then(|url| parse_url(url).ok()).is_some_and(|url| {
        url.host_str() == Some("github.com") && url.path().to_lowercase().starts_with("/qiskit/")
    })
}
