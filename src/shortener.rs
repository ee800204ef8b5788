use serde_json::{Value, json};
use tracing::info;

use crate::error::{EcosystemError, Upstream};
use crate::http::HttpClient;

const BITLY_BITLINKS: &str = "https://api-ssl.bitly.com/v4/bitlinks";

/// Mints permanent short links for member badges.
pub trait LinkShortener: Send + Sync {
    /// Returns the short link that redirects to the badge endpoint of `short_uuid`.
    fn shorten_badge(&self, name: &str, short_uuid: &str) -> Result<String, EcosystemError>;
}

#[derive(Debug, Clone)]
pub struct BadgeLinkSettings {
    pub group_guid: String,
    pub domain: String,
    /// Base url of the shields.io endpoint JSON files, without trailing slash.
    pub endpoint_base: String,
}

impl BadgeLinkSettings {
    pub fn long_url(&self, short_uuid: &str) -> String {
        format!(
            "https://img.shields.io/endpoint?style=flat&url={}/{short_uuid}",
            self.endpoint_base.trim_end_matches('/')
        )
    }

    pub fn request_body(&self, name: &str, short_uuid: &str) -> Value {
        json!({
            "long_url": self.long_url(short_uuid),
            "domain": self.domain,
            "group_guid": self.group_guid,
            "keyword": format!("e-{short_uuid}"),
            "title": format!("Qiskit ecosystem \"{name}\" badge"),
            "tags": ["qiskit ecosystem badge", "permanent _do NOT remove_"],
        })
    }
}

pub struct BitlyClient {
    http: HttpClient,
    settings: BadgeLinkSettings,
}

impl BitlyClient {
    /// The http client must carry the Bitly bearer token.
    pub fn new(http: HttpClient, settings: BadgeLinkSettings) -> Self {
        Self { http, settings }
    }
}

impl LinkShortener for BitlyClient {
    fn shorten_badge(&self, name: &str, short_uuid: &str) -> Result<String, EcosystemError> {
        let body = self.settings.request_body(name, short_uuid);
        let response = self.http.post_json(BITLY_BITLINKS, &body)?;
        let link = response
            .get("link")
            .and_then(Value::as_str)
            .ok_or_else(|| EcosystemError::UpstreamHttp {
                upstream: Upstream::Shortener,
                message: "response has no 'link' field".to_string(),
            })?;
        info!(name, link, "minted badge link");
        Ok(link.to_string())
    }
}

/// Shields.io endpoint document served for a member badge.
pub fn badge_endpoint(name: &str) -> Value {
    json!({
        "schemaVersion": 1,
        "label": "Qiskit Ecosystem",
        "namedLogo": "Qiskit",
        "message": name,
        "color": "6929C4",
    })
}
