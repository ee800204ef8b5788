use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EcosystemError;
use crate::fs_util::write_bytes_atomic;

pub const LABELS_JSON: &str = "labels.json";
pub const LABELS_TOML: &str = "labels.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The `labels.json` side file: every label ever used, with a description.
#[derive(Debug, Clone)]
pub struct LabelRegistry {
    path: Utf8PathBuf,
}

impl LabelRegistry {
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        Self {
            path: root.as_ref().join(LABELS_JSON),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Labels sorted by name. A missing file is an empty registry.
    pub fn read(&self) -> Result<Vec<Label>, EcosystemError> {
        if !self.path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(self.path.as_std_path()).map_err(EcosystemError::fs)?;
        serde_json::from_str(&content).map_err(|err| EcosystemError::StoreCorrupt {
            path: self.path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Adds unseen labels with an empty description. Nothing is ever removed.
    pub fn merge<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), EcosystemError> {
        let mut labels: BTreeMap<String, String> = self
            .read()?
            .into_iter()
            .map(|label| (label.name, label.description))
            .collect();
        let before = labels.len();
        for name in names {
            labels.entry(name.to_string()).or_default();
        }
        if labels.len() == before && self.path.as_std_path().exists() {
            return Ok(());
        }
        debug!(added = labels.len() - before, "merging labels");
        let labels: Vec<Label> = labels
            .into_iter()
            .map(|(name, description)| Label { name, description })
            .collect();
        write_bytes_atomic(&self.path, &to_json_indent4(&labels)?)
    }
}

fn to_json_indent4<T: Serialize>(value: &T) -> Result<Vec<u8>, EcosystemError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(EcosystemError::serde)?;
    out.push(b'\n');
    Ok(out)
}

/// The controlled vocabulary in `labels.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LabelsToml {
    #[serde(default)]
    pub categories: Vec<Label>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl LabelsToml {
    pub fn load(path: &Utf8Path) -> Result<Self, EcosystemError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| EcosystemError::fs(format!("read {path}: {err}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, EcosystemError> {
        toml::from_str(content).map_err(EcosystemError::serde)
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_parses_tables() {
        let vocabulary = LabelsToml::parse(
            r#"
[[categories]]
name = "Algorithms"

[[labels]]
name = "chemistry"
description = "Chemistry"
"#,
        )
        .unwrap();
        assert_eq!(vocabulary.category_names(), vec!["Algorithms"]);
        assert_eq!(vocabulary.label_names(), vec!["chemistry"]);
    }
}
