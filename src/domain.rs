use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::EcosystemError;

/// Characters of the member name kept in front of the short uuid.
pub const NAME_ID_PREFIX_LEN: usize = 10;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("static regex"));

/// Storage key of a member, also the stem of its TOML file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameId(String);

impl NameId {
    pub fn derive(name: &str, uuid: &str) -> Self {
        let flat: String = NON_ALPHANUMERIC
            .replace_all(name, "")
            .to_lowercase()
            .chars()
            .take(NAME_ID_PREFIX_LEN)
            .collect();
        Self(format!("{flat}_{}", short_uuid(uuid)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NameId {
    type Err = EcosystemError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches(".toml");
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !is_valid {
            return Err(EcosystemError::InvalidNameId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl AsRef<str> for NameId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// First group of a hyphenated uuid.
pub fn short_uuid(uuid: &str) -> &str {
    uuid.split('-').next().unwrap_or(uuid)
}

pub fn parse_url(value: &str) -> Result<Url, EcosystemError> {
    let trimmed = value.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).map_err(|_| EcosystemError::InvalidUrl(value.to_string()))?;
    if url.host_str().is_none() {
        return Err(EcosystemError::InvalidUrl(value.to_string()));
    }
    Ok(url)
}

/// Canonical string form of a member or package url.
pub fn normalize_url(value: &str) -> Result<String, EcosystemError> {
    let url = parse_url(value)?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn name_id_strips_and_truncates() {
        let id = NameId::derive("Qiskit Nature: Ünïcode & more!", "1a2b3c4d-0000-4000-8000-000000000000");
        assert_eq!(id.as_str(), "qiskitnatu_1a2b3c4d");
    }

    #[test]
    fn name_id_from_symbols_only() {
        let id = NameId::derive("+++", "deadbeef-1111");
        assert_eq!(id.as_str(), "_deadbeef");
    }

    #[test]
    fn parse_name_id_rejects_paths() {
        let err = "../etc/passwd".parse::<NameId>().unwrap_err();
        assert_matches!(err, EcosystemError::InvalidNameId(_));
        let ok: NameId = "qiskit_1a2b3c4d.toml".parse().unwrap();
        assert_eq!(ok.as_str(), "qiskit_1a2b3c4d");
    }

    #[test]
    fn normalize_adds_scheme_and_strips_slash() {
        assert_eq!(
            normalize_url("github.com/Org/repo/").unwrap(),
            "https://github.com/Org/repo"
        );
        assert_eq!(
            normalize_url(" https://example.org ").unwrap(),
            "https://example.org"
        );
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert_matches!(normalize_url("https://"), Err(EcosystemError::InvalidUrl(_)));
    }
}
