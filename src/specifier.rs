//! The subset of PEP 440 needed to match release lists against requirement specifiers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::EcosystemError;

static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^\s*v?
        (?:(?P<epoch>\d+)!)?
        (?P<release>\d+(?:\.\d+)*)
        (?:[-_.]?(?P<pre_l>a|alpha|b|beta|rc|c|pre|preview)[-_.]?(?P<pre_n>\d+)?)?
        (?:(?:-(?P<post_n1>\d+))|(?:[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>\d+)?))?
        (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>\d+)?)?
        (?:\+[a-z0-9]+(?:[-_.][a-z0-9]+)*)?
        \s*$",
    )
    .expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKind {
    Alpha,
    Beta,
    Rc,
}

#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

impl Version {
    pub fn major(&self) -> u64 {
        self.release.first().copied().unwrap_or(0)
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    fn release_at(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        (0..len)
            .map(|i| self.release_at(i).cmp(&other.release_at(i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Sort key for the suffixes: dev-only releases sort before pre-releases,
    /// which sort before finals, which sort before post-releases.
    fn suffix_key(&self) -> (u8, Option<(PreKind, u64)>, Option<u64>, u8, u64) {
        let phase = match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => 0,
            (Some(_), _, _) => 1,
            _ => 2,
        };
        let dev = match self.dev {
            Some(n) => (0, n),
            None => (1, 0),
        };
        (phase, self.pre, self.post, dev.0, dev.1)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.cmp_release(other))
            .then_with(|| self.suffix_key().cmp(&other.suffix_key()))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = EcosystemError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || EcosystemError::InvalidSpecifier(value.to_string());
        let caps = VERSION.captures(value).ok_or_else(invalid)?;
        let number = |name: &str| -> Result<Option<u64>, EcosystemError> {
            caps.name(name)
                .map(|m| m.as_str().parse().map_err(|_| invalid()))
                .transpose()
        };
        let release = caps
            .name("release")
            .ok_or_else(invalid)?
            .as_str()
            .split('.')
            .map(|part| part.parse().map_err(|_| invalid()))
            .collect::<Result<Vec<u64>, _>>()?;
        let pre = match caps.name("pre_l") {
            Some(label) => {
                let kind = match label.as_str().to_ascii_lowercase().as_str() {
                    "a" | "alpha" => PreKind::Alpha,
                    "b" | "beta" => PreKind::Beta,
                    _ => PreKind::Rc,
                };
                Some((kind, number("pre_n")?.unwrap_or(0)))
            }
            None => None,
        };
        let post = match (caps.name("post_n1"), number("post_n2")?) {
            (Some(n), _) => Some(n.as_str().parse().map_err(|_| invalid())?),
            (None, Some(n)) => Some(n),
            (None, None) if caps.name("post_l").is_some() => Some(0),
            (None, None) => None,
        };
        let dev = match caps.name("dev_l") {
            Some(_) => Some(number("dev_n")?.unwrap_or(0)),
            None => None,
        };
        Ok(Self {
            epoch: number("epoch")?.unwrap_or(0),
            release,
            pre,
            post,
            dev,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((kind, n)) = self.pre {
            let label = match kind {
                PreKind::Alpha => "a",
                PreKind::Beta => "b",
                PreKind::Rc => "rc",
            };
            write!(f, "{label}{n}")?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{n}")?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{n}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Compatible,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Arbitrary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Operator,
    version: Version,
    raw: String,
    wildcard: bool,
}

impl Clause {
    fn parse(text: &str) -> Result<Self, EcosystemError> {
        let text = text.trim();
        let (op, rest) = [
            ("~=", Operator::Compatible),
            ("===", Operator::Arbitrary),
            ("==", Operator::Equal),
            ("!=", Operator::NotEqual),
            ("<=", Operator::LessEqual),
            (">=", Operator::GreaterEqual),
            ("<", Operator::Less),
            (">", Operator::Greater),
        ]
        .iter()
        .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest.trim())))
        .ok_or_else(|| EcosystemError::InvalidSpecifier(text.to_string()))?;

        let wildcard = rest.ends_with(".*");
        if wildcard && !matches!(op, Operator::Equal | Operator::NotEqual) {
            return Err(EcosystemError::InvalidSpecifier(text.to_string()));
        }
        let version: Version = rest.trim_end_matches(".*").parse()?;
        if op == Operator::Compatible && version.release.len() < 2 {
            return Err(EcosystemError::InvalidSpecifier(text.to_string()));
        }
        Ok(Self {
            op,
            version,
            raw: rest.to_string(),
            wildcard,
        })
    }

    fn prefix_matches(&self, candidate: &Version) -> bool {
        self.version.epoch == candidate.epoch
            && self
                .version
                .release
                .iter()
                .enumerate()
                .all(|(i, part)| candidate.release_at(i) == *part)
    }

    fn contains(&self, candidate: &Version) -> bool {
        match self.op {
            Operator::Equal if self.wildcard => self.prefix_matches(candidate),
            Operator::NotEqual if self.wildcard => !self.prefix_matches(candidate),
            Operator::Equal => candidate == &self.version,
            Operator::NotEqual => candidate != &self.version,
            Operator::LessEqual => candidate <= &self.version,
            Operator::GreaterEqual => candidate >= &self.version,
            Operator::Less => candidate < &self.version,
            Operator::Greater => candidate > &self.version,
            Operator::Compatible => {
                let mut prefix = self.version.release.clone();
                prefix.pop();
                let upper = Clause {
                    op: Operator::Equal,
                    version: Version {
                        epoch: self.version.epoch,
                        release: prefix,
                        pre: None,
                        post: None,
                        dev: None,
                    },
                    raw: String::new(),
                    wildcard: true,
                };
                candidate >= &self.version && upper.prefix_matches(candidate)
            }
            Operator::Arbitrary => candidate.to_string() == self.raw,
        }
    }
}

/// Comma-separated list of version clauses, all of which must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    clauses: Vec<Clause>,
}

impl Specifier {
    pub fn contains(&self, version: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.contains(version))
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl FromStr for Specifier {
    type Err = EcosystemError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let clauses = value
            .split(',')
            .map(str::trim)
            .filter(|clause| !clause.is_empty())
            .map(Clause::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| {
                let op = match clause.op {
                    Operator::Compatible => "~=",
                    Operator::Equal => "==",
                    Operator::NotEqual => "!=",
                    Operator::LessEqual => "<=",
                    Operator::GreaterEqual => ">=",
                    Operator::Less => "<",
                    Operator::Greater => ">",
                    Operator::Arbitrary => "===",
                };
                format!("{op}{}", clause.raw)
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// A `requires_dist` entry reduced to what matching needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub specifier: Specifier,
}

static REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*\(?([^;)]*)\)?\s*(?:;.*)?$")
        .expect("static regex")
});

impl FromStr for Requirement {
    type Err = EcosystemError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let caps = REQUIREMENT
            .captures(value)
            .ok_or_else(|| EcosystemError::InvalidSpecifier(value.to_string()))?;
        let name = caps
            .get(1)
            .map(|m| canonicalize_name(m.as_str()))
            .ok_or_else(|| EcosystemError::InvalidSpecifier(value.to_string()))?;
        let specifier = caps.get(2).map(|m| m.as_str()).unwrap_or("").parse()?;
        Ok(Self { name, specifier })
    }
}

static NAME_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("static regex"));

/// Lowercases and collapses runs of `-`, `_` and `.` into `-`.
pub fn canonicalize_name(name: &str) -> String {
    NAME_SEPARATORS
        .replace_all(name.trim(), "-")
        .to_lowercase()
}
