use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Remote services the crate talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Github,
    Pypi,
    Julia,
    Shortener,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Github => write!(f, "GitHub"),
            Upstream::Pypi => write!(f, "PyPI"),
            Upstream::Julia => write!(f, "Julia registry"),
            Upstream::Shortener => write!(f, "link shortener"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum EcosystemError {
    #[error("invalid {kind} url: {url}")]
    InvalidSourceUrl { kind: &'static str, url: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid member id: {0}")]
    InvalidNameId(String),

    #[error("invalid package name: {0}")]
    InvalidPackageName(String),

    #[error("invalid version specifier: {0}")]
    InvalidSpecifier(String),

    #[error("{upstream} request failed: {message}")]
    UpstreamHttp { upstream: Upstream, message: String },

    #[error("{upstream} returned status {status}: {message}")]
    UpstreamStatus {
        upstream: Upstream,
        status: u16,
        message: String,
    },

    #[error("{source_kind} has no attribute '{attribute}'")]
    UnknownAttribute {
        source_kind: &'static str,
        attribute: String,
    },

    #[error("{source_kind} attribute '{attribute}' is not available")]
    AttributeMissing {
        source_kind: &'static str,
        attribute: String,
    },

    #[error("{source_kind} attribute '{attribute}' is ambiguous ({matches} matches)")]
    #[diagnostic(help("declare a reducer for this field"))]
    AmbiguousAttribute {
        source_kind: &'static str,
        attribute: String,
        matches: usize,
    },

    #[error("corrupt member file {path}: {message}")]
    StoreCorrupt { path: PathBuf, message: String },

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("failed to parse submission: {0}")]
    SubmissionParse(String),

    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EcosystemError {
    pub fn http(upstream: Upstream, err: impl fmt::Display) -> Self {
        EcosystemError::UpstreamHttp {
            upstream,
            message: err.to_string(),
        }
    }

    pub fn fs(err: impl fmt::Display) -> Self {
        EcosystemError::Filesystem(err.to_string())
    }

    pub fn serde(err: impl fmt::Display) -> Self {
        EcosystemError::Serialization(err.to_string())
    }

    /// True for the failures caused by a remote service rather than local data.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            EcosystemError::UpstreamHttp { .. } | EcosystemError::UpstreamStatus { .. }
        )
    }
}
