//! Version specifiers and conjunctive specifier sets

use std::fmt;
use std::str::FromStr;

use crate::version::{Version, VersionError};

/// Comparison operators for version specifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal (==)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal (<=)
    LessThanOrEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal (>=)
    GreaterThanOrEqual,
    /// Compatible release (~=)
    Compatible,
    /// Arbitrary string equality (===)
    ArbitraryEqual,
}

impl Operator {
    /// Get the string representation of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::Compatible => "~=",
            Operator::ArbitraryEqual => "===",
        }
    }

    // Longest operators first so that "===" is not read as "==".
    fn split(content: &str) -> Option<(Operator, &str)> {
        const OPERATORS: [(&str, Operator); 8] = [
            ("===", Operator::ArbitraryEqual),
            ("==", Operator::Equal),
            ("~=", Operator::Compatible),
            ("!=", Operator::NotEqual),
            ("<=", Operator::LessThanOrEqual),
            (">=", Operator::GreaterThanOrEqual),
            ("<", Operator::LessThan),
            (">", Operator::GreaterThan),
        ];

        OPERATORS
            .iter()
            .find(|(prefix, _)| content.starts_with(prefix))
            .map(|(prefix, operator)| (*operator, content[prefix.len()..].trim()))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The version side of a specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum VersionPattern {
    /// A concrete version ("==1.0", ">=2").
    Exact(Version),
    /// A wildcard prefix ("==3.*"), valid for equality operators only.
    Wildcard { epoch: u64, release: Vec<u64> },
    /// The raw literal of an arbitrary equality ("===custom").
    Literal(String),
}

/// A single version clause, e.g. ">= 10" or "== 3.*".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Specifier {
    pub(crate) operator: Operator,
    pub(crate) pattern: VersionPattern,
}

impl Specifier {
    /// Parse a specifier string
    pub fn parse(content: &str) -> Result<Self, VersionError> {
        let content = content.trim();
        let (operator, remainder) = Operator::split(content)
            .ok_or_else(|| VersionError::InvalidSpecifier(content.to_string()))?;

        if remainder.is_empty() {
            return Err(VersionError::InvalidSpecifier(content.to_string()));
        }

        if operator == Operator::ArbitraryEqual {
            return Ok(Specifier {
                operator,
                pattern: VersionPattern::Literal(remainder.to_string()),
            });
        }

        if let Some(prefix) = remainder.strip_suffix(".*") {
            if !matches!(operator, Operator::Equal | Operator::NotEqual) {
                return Err(VersionError::InvalidSpecifier(content.to_string()));
            }
            let version = Version::parse(prefix)
                .map_err(|_| VersionError::InvalidSpecifier(content.to_string()))?;
            return Ok(Specifier {
                operator,
                pattern: VersionPattern::Wildcard {
                    epoch: version.epoch(),
                    release: version.release().to_vec(),
                },
            });
        }

        let version = Version::parse(remainder)
            .map_err(|_| VersionError::InvalidSpecifier(content.to_string()))?;

        // A compatible release clause needs a segment to bump.
        if operator == Operator::Compatible && version.release().len() < 2 {
            return Err(VersionError::InvalidSpecifier(content.to_string()));
        }

        Ok(Specifier {
            operator,
            pattern: VersionPattern::Exact(version),
        })
    }

    /// Return the specifier operator
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Check whether *version* satisfies this specifier
    pub fn contains(&self, version: &Version) -> bool {
        match (&self.operator, &self.pattern) {
            (Operator::ArbitraryEqual, VersionPattern::Literal(literal)) => {
                version.to_string() == *literal
            }
            (Operator::Equal, VersionPattern::Wildcard { epoch, release }) => {
                version.epoch() == *epoch && version.release_starts_with(release)
            }
            (Operator::NotEqual, VersionPattern::Wildcard { epoch, release }) => {
                !(version.epoch() == *epoch && version.release_starts_with(release))
            }
            (operator, VersionPattern::Exact(target)) => match operator {
                Operator::Equal => equal_ignoring_local(version, target),
                Operator::NotEqual => !equal_ignoring_local(version, target),
                Operator::LessThan => version < target,
                Operator::LessThanOrEqual => version <= target,
                Operator::GreaterThan => version > target,
                Operator::GreaterThanOrEqual => version >= target,
                Operator::Compatible => {
                    let prefix = &target.release()[..target.release().len() - 1];
                    version >= target
                        && version.epoch() == target.epoch()
                        && version.release_starts_with(prefix)
                }
                Operator::ArbitraryEqual => unreachable!("literal pattern handled above"),
            },
            _ => false,
        }
    }
}

// When the clause carries no local label, the candidate's one is ignored.
fn equal_ignoring_local(version: &Version, target: &Version) -> bool {
    if target.local().is_empty() {
        version.epoch() == target.epoch()
            && version.release_starts_with(target.release())
            && target.release_starts_with(version.release())
            && version.pre() == target.pre()
            && version.post() == target.post()
            && version.dev() == target.dev()
    } else {
        version == target
    }
}

impl FromStr for Specifier {
    type Err = VersionError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Self::parse(content)
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pattern {
            VersionPattern::Exact(version) => write!(f, "{}{}", self.operator, version),
            VersionPattern::Wildcard { epoch, release } => {
                write!(f, "{}", self.operator)?;
                if *epoch > 0 {
                    write!(f, "{}!", epoch)?;
                }
                let release: Vec<String> = release.iter().map(|n| n.to_string()).collect();
                write!(f, "{}.*", release.join("."))
            }
            VersionPattern::Literal(literal) => write!(f, "{}{}", self.operator, literal),
        }
    }
}

/// A conjunction of specifiers (">=10, <11" matches versions satisfying
/// every clause).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpecifierSet {
    specifiers: Vec<Specifier>,
}

impl SpecifierSet {
    /// Return a set matching any version
    pub fn any() -> Self {
        SpecifierSet::default()
    }

    /// Parse a comma-separated specifier list ("", ">=1", ">=1, <2")
    pub fn parse(content: &str) -> Result<Self, VersionError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(SpecifierSet::default());
        }

        let specifiers = content
            .split(',')
            .map(Specifier::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SpecifierSet { specifiers })
    }

    /// Return the individual specifiers
    pub fn specifiers(&self) -> &[Specifier] {
        &self.specifiers
    }

    /// Indicate whether the set contains no clause
    pub fn is_empty(&self) -> bool {
        self.specifiers.is_empty()
    }

    /// Check whether *version* satisfies every clause
    pub fn contains(&self, version: &Version) -> bool {
        self.specifiers.iter().all(|specifier| specifier.contains(version))
    }

    /// Return the conjunction of both sets.
    ///
    /// Clauses already present are not duplicated, so intersecting a set
    /// with itself is the identity.
    pub fn intersection(&self, other: &SpecifierSet) -> SpecifierSet {
        let mut specifiers = self.specifiers.clone();
        for specifier in &other.specifiers {
            if !specifiers.contains(specifier) {
                specifiers.push(specifier.clone());
            }
        }
        SpecifierSet { specifiers }
    }
}

impl FromStr for SpecifierSet {
    type Err = VersionError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Self::parse(content)
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses: Vec<String> =
            self.specifiers.iter().map(|specifier| specifier.to_string()).collect();
        clauses.sort_by(|a, b| b.cmp(a));
        write!(f, "{}", clauses.join(", "))
    }
}
