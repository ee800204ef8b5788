use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::EcosystemError;
use crate::shortener::BadgeLinkSettings;

pub const DEFAULT_CONFIG_FILE: &str = "ecosystem.toml";
pub const GITHUB_TOKEN_VAR: &str = "GH_TOKEN";
pub const BITLY_TOKEN_VAR: &str = "BITLY_TOKEN";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub resources_dir: Option<String>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub github_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub reference_package: Option<String>,
    #[serde(default)]
    pub release_table_path: Option<String>,
    #[serde(default)]
    pub release_table_max_age_hours: Option<u64>,
    #[serde(default)]
    pub badge: Option<BadgeConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BadgeConfig {
    #[serde(default)]
    pub group_guid: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub endpoint_base: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub resources_dir: Utf8PathBuf,
    pub http_timeout: Duration,
    pub github_cache_ttl: Duration,
    pub reference_package: String,
    pub release_table_path: Utf8PathBuf,
    pub release_table_max_age: chrono::Duration,
    pub badge: BadgeLinkSettings,
    pub github_token: Option<String>,
    pub bitly_token: Option<String>,
}

impl ResolvedConfig {
    pub fn require_bitly_token(&self) -> Result<&str, EcosystemError> {
        self.bitly_token
            .as_deref()
            .ok_or(EcosystemError::MissingCredential(BITLY_TOKEN_VAR))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `ecosystem.toml` when present, and applies the environment.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EcosystemError> {
        let config_path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| EcosystemError::ConfigRead(config_path.clone()))?;
            Self::parse(&content)?
        };
        Self::resolve_config(config, |key| std::env::var(key).ok())
    }

    pub fn parse(content: &str) -> Result<Config, EcosystemError> {
        toml::from_str(content).map_err(|err| EcosystemError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, EcosystemError> {
        let reference_package = config
            .reference_package
            .unwrap_or_else(|| "qiskit".to_string());
        let release_table_path = match config.release_table_path {
            Some(path) => Utf8PathBuf::from(path),
            None => default_release_table_path(&reference_package)?,
        };
        let max_age_hours = config.release_table_max_age_hours.unwrap_or(24);
        let max_age_hours = i64::try_from(max_age_hours).map_err(|_| {
            EcosystemError::ConfigParse(format!(
                "release_table_max_age_hours is too large: {max_age_hours}"
            ))
        })?;
        let badge = config.badge.unwrap_or_default();
        let token = |key: &str| env(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        Ok(ResolvedConfig {
            resources_dir: Utf8PathBuf::from(
                config
                    .resources_dir
                    .unwrap_or_else(|| "ecosystem/resources".to_string()),
            ),
            http_timeout: Duration::from_secs(config.http_timeout_secs.unwrap_or(240)),
            github_cache_ttl: Duration::from_secs(config.github_cache_ttl_secs.unwrap_or(86_400)),
            reference_package,
            release_table_path,
            release_table_max_age: chrono::Duration::hours(max_age_hours),
            badge: BadgeLinkSettings {
                group_guid: badge.group_guid.unwrap_or_else(|| "Bj9rgMHKfxH".to_string()),
                domain: badge.domain.unwrap_or_else(|| "qisk.it".to_string()),
                endpoint_base: badge
                    .endpoint_base
                    .unwrap_or_else(|| "https://qiskit.github.io/ecosystem/b".to_string()),
            },
            github_token: token(GITHUB_TOKEN_VAR),
            bitly_token: token(BITLY_TOKEN_VAR),
        })
    }
}

fn default_release_table_path(package: &str) -> Result<Utf8PathBuf, EcosystemError> {
    let dirs = ProjectDirs::from("org", "qiskit", "ecosystem-manager").ok_or_else(|| {
        EcosystemError::ConfigParse("unable to resolve cache directory".to_string())
    })?;
    let path = dirs.cache_dir().join(format!("{package}-releases.json"));
    Utf8PathBuf::from_path_buf(path)
        .map_err(|_| EcosystemError::ConfigParse("cache directory is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_file() {
        let config = Config {
            release_table_path: Some("/tmp/qiskit.json".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config, |_| None).unwrap();
        assert_eq!(resolved.http_timeout, Duration::from_secs(240));
        assert_eq!(resolved.reference_package, "qiskit");
        assert_eq!(resolved.badge.domain, "qisk.it");
        assert!(resolved.github_token.is_none());
    }
}
