//! PEP 440 version parsing and normalization

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use thiserror::Error;

lazy_static! {
    // Full PEP 440 grammar, case-insensitive, with the usual separator
    // tolerance ("1.0-alpha.2", "1.0_post1", "v1.0").
    static ref VERSION_RE: Regex = Regex::new(
        r"(?ix)^\s*v?
        (?:(?P<epoch>\d+)!)?
        (?P<release>\d+(?:\.\d+)*)
        (?:[-_.]?(?P<pre_l>a|b|c|rc|alpha|beta|pre|preview)[-_.]?(?P<pre_n>\d+)?)?
        (?P<post>(?:-(?P<post_n1>\d+))|(?:[-_.]?(?:post|rev|r)[-_.]?(?P<post_n2>\d+)?))?
        (?P<dev>[-_.]?dev[-_.]?(?P<dev_n>\d+)?)?
        (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
        \s*$"
    ).unwrap();
}

/// Error type for version parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("The version '{0}' is incorrect")]
    InvalidVersion(String),

    #[error("The specifier '{0}' is incorrect")]
    InvalidSpecifier(String),
}

/// Pre-release cycle of a version ("a" < "b" < "rc")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreReleaseKind {
    Alpha,
    Beta,
    ReleaseCandidate,
}

impl PreReleaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreReleaseKind::Alpha => "a",
            PreReleaseKind::Beta => "b",
            PreReleaseKind::ReleaseCandidate => "rc",
        }
    }

    fn from_label(label: &str) -> Self {
        match label {
            "a" | "alpha" => PreReleaseKind::Alpha,
            "b" | "beta" => PreReleaseKind::Beta,
            _ => PreReleaseKind::ReleaseCandidate,
        }
    }
}

/// One segment of a local version label.
///
/// Numeric segments compare numerically and sort above alphanumeric ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocalSegment {
    Text(String),
    Number(u64),
}

impl fmt::Display for LocalSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalSegment::Text(text) => write!(f, "{}", text),
            LocalSegment::Number(number) => write!(f, "{}", number),
        }
    }
}

/// A PEP 440 version.
///
/// Versions form a total order over `(epoch, release, pre, post, dev,
/// local)` and render to a canonical string::
///
///     use wiz_version::Version;
///
///     let version = Version::parse("2018.1.0-rc.1").unwrap();
///     assert_eq!(version.to_string(), "2018.1.0rc1");
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreReleaseKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Vec<LocalSegment>,
}

impl Version {
    /// Parse a version string
    pub fn parse(content: &str) -> Result<Self, VersionError> {
        let captures = VERSION_RE
            .captures(content)
            .ok_or_else(|| VersionError::InvalidVersion(content.to_string()))?;

        let parse_number = |name: &str| -> Result<Option<u64>, VersionError> {
            captures
                .name(name)
                .map(|m| {
                    m.as_str()
                        .parse::<u64>()
                        .map_err(|_| VersionError::InvalidVersion(content.to_string()))
                })
                .transpose()
        };

        let epoch = parse_number("epoch")?.unwrap_or(0);

        let release = captures["release"]
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| VersionError::InvalidVersion(content.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pre = match captures.name("pre_l") {
            Some(label) => {
                let kind = PreReleaseKind::from_label(&label.as_str().to_lowercase());
                Some((kind, parse_number("pre_n")?.unwrap_or(0)))
            }
            None => None,
        };

        // "1.0-1" is an implicit post release; "1.0.post" defaults to 0.
        let post = match captures.name("post") {
            Some(group) if !group.as_str().is_empty() => {
                if captures.name("post_n1").is_some() {
                    parse_number("post_n1")?
                } else {
                    Some(parse_number("post_n2")?.unwrap_or(0))
                }
            }
            _ => None,
        };

        let dev = match captures.name("dev") {
            Some(group) if !group.as_str().is_empty() => {
                Some(parse_number("dev_n")?.unwrap_or(0))
            }
            _ => None,
        };

        let local = match captures.name("local") {
            Some(label) => label
                .as_str()
                .split(['-', '_', '.'])
                .map(|segment| match segment.parse::<u64>() {
                    Ok(number) => LocalSegment::Number(number),
                    Err(_) => LocalSegment::Text(segment.to_lowercase()),
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(Version {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    /// Return the epoch segment
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Return the release segments
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Return the pre-release marker, if any
    pub fn pre(&self) -> Option<(PreReleaseKind, u64)> {
        self.pre
    }

    /// Return the post-release number, if any
    pub fn post(&self) -> Option<u64> {
        self.post
    }

    /// Return the development release number, if any
    pub fn dev(&self) -> Option<u64> {
        self.dev
    }

    /// Return the local version segments
    pub fn local(&self) -> &[LocalSegment] {
        &self.local
    }

    // Build a version from release segments only, used for range bounds.
    pub(crate) fn from_parts(epoch: u64, release: Vec<u64>, dev: Option<u64>) -> Self {
        Version {
            epoch,
            release,
            pre: None,
            post: None,
            dev,
            local: Vec::new(),
        }
    }

    /// Return the smallest representable version ("0.dev0")
    pub fn zero() -> Self {
        Version {
            epoch: 0,
            release: vec![0],
            pre: None,
            post: None,
            dev: Some(0),
            local: Vec::new(),
        }
    }

    /// Return a sentinel version above every real version
    pub fn positive_infinity() -> Self {
        Version {
            epoch: u64::MAX,
            release: vec![u64::MAX],
            pre: None,
            post: None,
            dev: None,
            local: Vec::new(),
        }
    }

    /// Compare the release segments against *prefix*, zero-padded.
    ///
    /// Used for wildcard specifiers: "3.7.1" starts with "3.7" and "3",
    /// "3.0" starts with "3.0.0".
    pub fn release_starts_with(&self, prefix: &[u64]) -> bool {
        (0..prefix.len()).all(|index| {
            self.release.get(index).copied().unwrap_or(0) == prefix[index]
        })
    }

    fn pre_key(&self) -> PrePhase {
        match self.pre {
            Some((kind, number)) => PrePhase::Pre(kind, number),
            // A dev release without pre/post marker sorts below everything
            // sharing its release segments.
            None if self.post.is_none() && self.dev.is_some() => PrePhase::Minimum,
            None => PrePhase::Final,
        }
    }

    fn post_key(&self) -> PostPhase {
        match self.post {
            Some(number) => PostPhase::Post(number),
            None => PostPhase::Minimum,
        }
    }

    fn dev_key(&self) -> DevPhase {
        match self.dev {
            Some(number) => DevPhase::Dev(number),
            None => DevPhase::Final,
        }
    }

    fn compare_release(&self, other: &Self) -> Ordering {
        let length = self.release.len().max(other.release.len());
        for index in 0..length {
            let left = self.release.get(index).copied().unwrap_or(0);
            let right = other.release.get(index).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PrePhase {
    Minimum,
    Pre(PreReleaseKind, u64),
    Final,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PostPhase {
    Minimum,
    Post(u64),
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum DevPhase {
    Dev(u64),
    Final,
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.compare_release(other))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post_key().cmp(&other.post_key()))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Self::parse(content)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}!", self.epoch)?;
        }

        let release: Vec<String> = self.release.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", release.join("."))?;

        if let Some((kind, number)) = self.pre {
            write!(f, "{}{}", kind.as_str(), number)?;
        }
        if let Some(number) = self.post {
            write!(f, ".post{}", number)?;
        }
        if let Some(number) = self.dev {
            write!(f, ".dev{}", number)?;
        }
        if !self.local.is_empty() {
            let local: Vec<String> = self.local.iter().map(|s| s.to_string()).collect();
            write!(f, "+{}", local.join("."))?;
        }

        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
