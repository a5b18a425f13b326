//! Package requirements with namespaces and variant selectors

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::specifier::SpecifierSet;
use crate::version::Version;

/// Separator between namespaces and identifier
pub const NAMESPACE_SEPARATOR: &str = "::";

lazy_static! {
    // "[ns::[ns2::]]name[[variant]] specifiers"
    static ref REQUIREMENT_RE: Regex = Regex::new(
        r"(?x)^\s*
        (?P<namespace>(?:[A-Za-z0-9_.\-]+::)+)?
        (?P<name>[A-Za-z0-9_.\-]+)
        (?:\[(?P<extras>[^\]]*)\])?
        \s*
        (?P<specifiers>[^\s].*?)?
        \s*$"
    ).unwrap();
}

/// Error type for requirement parsing and combination
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequirementError {
    #[error("The requirement '{0}' is incorrect")]
    InvalidRequirement(String),

    #[error("The requirement '{0}' cannot select more than one variant")]
    MultipleExtras(String),

    #[error("Impossible to combine requirements with different names [{0}, {1}]")]
    IncompatibleNames(String, String),
}

/// A package requirement, e.g. "maya::mtoa[2020] >=2, <3".
///
/// The optional bracketed token selects a single variant; the trailing
/// clauses form a conjunctive [`SpecifierSet`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    namespace: Option<String>,
    name: String,
    variant: Option<String>,
    specifiers: SpecifierSet,
}

impl Requirement {
    /// Parse a requirement string
    pub fn parse(content: &str) -> Result<Self, RequirementError> {
        let captures = REQUIREMENT_RE
            .captures(content)
            .ok_or_else(|| RequirementError::InvalidRequirement(content.to_string()))?;

        let namespace = captures.name("namespace").map(|group| {
            group
                .as_str()
                .trim_end_matches(NAMESPACE_SEPARATOR)
                .to_string()
        });

        let name = captures["name"].to_string();

        let variant = match captures.name("extras") {
            Some(group) => {
                let extras: Vec<&str> = group
                    .as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|extra| !extra.is_empty())
                    .collect();

                if extras.len() > 1 {
                    return Err(RequirementError::MultipleExtras(content.to_string()));
                }
                extras.first().map(|extra| extra.to_string())
            }
            None => None,
        };

        let specifiers = match captures.name("specifiers") {
            Some(group) => SpecifierSet::parse(group.as_str())
                .map_err(|_| RequirementError::InvalidRequirement(content.to_string()))?,
            None => SpecifierSet::default(),
        };

        Ok(Requirement {
            namespace,
            name,
            variant,
            specifiers,
        })
    }

    /// Create a requirement targeting *name* with no constraint
    pub fn unconstrained(name: &str) -> Self {
        Requirement {
            namespace: None,
            name: name.to_string(),
            variant: None,
            specifiers: SpecifierSet::default(),
        }
    }

    /// Return the requirement namespace, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Return the requirement name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the requested variant identifier, if any
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Return the specifier set
    pub fn specifiers(&self) -> &SpecifierSet {
        &self.specifiers
    }

    /// Return the namespace-qualified name ("maya::mtoa" or "mtoa")
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, self.name),
            None => self.name.clone(),
        }
    }

    /// Return a copy with *namespace* set
    pub fn with_namespace(&self, namespace: &str) -> Self {
        let mut requirement = self.clone();
        requirement.namespace = Some(namespace.to_string());
        requirement
    }

    /// Return a copy whose specifier set also excludes *version*
    pub fn excluding_version(&self, version: &Version) -> Result<Self, RequirementError> {
        let exclusion = SpecifierSet::parse(&format!("!={}", version))
            .map_err(|_| RequirementError::InvalidRequirement(version.to_string()))?;

        let mut requirement = self.clone();
        requirement.specifiers = requirement.specifiers.intersection(&exclusion);
        Ok(requirement)
    }

    /// Check whether *version* satisfies the specifier set
    pub fn matches_version(&self, version: &Version) -> bool {
        self.specifiers.contains(version)
    }

    /// Return the conjunction of both requirements.
    ///
    /// Names must be identical, and namespaces too where both are set. The
    /// variant extras are merged so that a parent which demanded one keeps
    /// it in the combined requirement.
    pub fn combine(&self, other: &Requirement) -> Result<Requirement, RequirementError> {
        if self.name != other.name {
            return Err(RequirementError::IncompatibleNames(
                self.name.clone(),
                other.name.clone(),
            ));
        }
        if let (Some(left), Some(right)) = (&self.namespace, &other.namespace) {
            if left != right {
                return Err(RequirementError::IncompatibleNames(
                    self.qualified_name(),
                    other.qualified_name(),
                ));
            }
        }

        Ok(Requirement {
            namespace: self.namespace.clone().or_else(|| other.namespace.clone()),
            name: self.name.clone(),
            variant: self.variant.clone().or_else(|| other.variant.clone()),
            specifiers: self.specifiers.intersection(&other.specifiers),
        })
    }

    /// Indicate whether the version ranges of both requirements intersect
    pub fn is_overlapping(&self, other: &Requirement) -> bool {
        self.specifiers.is_overlapping(&other.specifiers)
    }
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Self::parse(content)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())?;

        if let Some(variant) = &self.variant {
            write!(f, "[{}]", variant)?;
        }
        if !self.specifiers.is_empty() {
            write!(f, " {}", self.specifiers)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_only() {
        let requirement = Requirement::parse("maya").unwrap();
        assert_eq!(requirement.name(), "maya");
        assert_eq!(requirement.namespace(), None);
        assert_eq!(requirement.variant(), None);
        assert!(requirement.specifiers().is_empty());
    }

    #[test]
    fn test_parse_namespaces() {
        let requirement = Requirement::parse("maya::mtoa").unwrap();
        assert_eq!(requirement.namespace(), Some("maya"));
        assert_eq!(requirement.qualified_name(), "maya::mtoa");

        let requirement = Requirement::parse("ns1::ns2::foo").unwrap();
        assert_eq!(requirement.namespace(), Some("ns1::ns2"));
        assert_eq!(requirement.name(), "foo");
    }

    #[test]
    fn test_parse_variant() {
        let requirement = Requirement::parse("numpy[2.7]").unwrap();
        assert_eq!(requirement.variant(), Some("2.7"));

        assert_eq!(
            Requirement::parse("numpy[2.7, 3.7]"),
            Err(RequirementError::MultipleExtras("numpy[2.7, 3.7]".to_string()))
        );
    }

    #[test]
    fn test_parse_specifiers() {
        let requirement = Requirement::parse("nuke >= 10, < 11").unwrap();
        assert!(requirement.matches_version(&Version::parse("10.5").unwrap()));
        assert!(!requirement.matches_version(&Version::parse("11.0").unwrap()));
    }

    #[test]
    fn test_parse_incorrect() {
        assert!(Requirement::parse("").is_err());
        assert!(Requirement::parse("foo >=").is_err());
        assert!(Requirement::parse("foo bar").is_err());
    }

    #[test]
    fn test_display() {
        let cases = [
            ("maya", "maya"),
            ("nuke>=10,<11", "nuke >=10, <11"),
            ("ldpk-nuke[10.0]", "ldpk-nuke[10.0]"),
            ("maya::mtoa ==2.*", "maya::mtoa ==2.*"),
        ];
        for (content, expected) in cases {
            assert_eq!(Requirement::parse(content).unwrap().to_string(), expected);
        }
    }

    #[test]
    fn test_combine() {
        let left = Requirement::parse("foo >=1").unwrap();
        let right = Requirement::parse("foo <2").unwrap();
        let combined = left.combine(&right).unwrap();
        assert_eq!(combined.to_string(), "foo >=1, <2");
    }

    #[test]
    fn test_combine_union_of_extras() {
        // A parent that demanded a variant keeps it in the combination.
        let left = Requirement::parse("foo >=1").unwrap();
        let right = Requirement::parse("foo[V1] <2").unwrap();
        assert_eq!(left.combine(&right).unwrap().variant(), Some("V1"));
        assert_eq!(right.combine(&left).unwrap().variant(), Some("V1"));
    }

    #[test]
    fn test_combine_different_names() {
        let left = Requirement::parse("foo").unwrap();
        let right = Requirement::parse("bar").unwrap();
        assert!(left.combine(&right).is_err());
    }

    #[test]
    fn test_excluding_version() {
        let requirement = Requirement::parse("foo <2").unwrap();
        let excluded = requirement
            .excluding_version(&Version::parse("1.0.0").unwrap())
            .unwrap();
        assert!(!excluded.matches_version(&Version::parse("1.0.0").unwrap()));
        assert!(excluded.matches_version(&Version::parse("0.5.0").unwrap()));
    }

    #[test]
    fn test_overlapping() {
        let left = Requirement::parse("python >=2.7, <2.8").unwrap();
        let right = Requirement::parse("python ==3.*").unwrap();
        assert!(!left.is_overlapping(&right));
        assert!(left.is_overlapping(&Requirement::parse("python <3").unwrap()));
    }
}
