//! Range bounds extracted from specifier sets

use std::fmt;

use crate::specifier::{Operator, SpecifierSet, VersionPattern};
use crate::version::Version;

/// Represents a bound (lower or upper) of a version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    version: Version,
    is_inclusive: bool,
}

impl Bound {
    /// Create a new bound
    pub fn new(version: Version, is_inclusive: bool) -> Self {
        Bound {
            version,
            is_inclusive,
        }
    }

    /// Get the bound version
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Check if the bound is inclusive
    pub fn is_inclusive(&self) -> bool {
        self.is_inclusive
    }

    /// Create the zero bound (minimum possible version)
    pub fn zero() -> Self {
        Bound {
            version: Version::zero(),
            is_inclusive: true,
        }
    }

    /// Create positive infinity bound (maximum possible version)
    pub fn positive_infinity() -> Self {
        Bound {
            version: Version::positive_infinity(),
            is_inclusive: false,
        }
    }

    /// Answer "is this bound higher than *other*?" (`>`) or the reverse
    /// (`<`), accounting for inclusivity on equal versions.
    pub fn is_higher_than(&self, other: &Bound) -> bool {
        if self == other {
            return false;
        }
        match self.version.cmp(&other.version) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => other.is_inclusive,
        }
    }

    /// The `<` counterpart of [`Bound::is_higher_than`]
    pub fn is_lower_than(&self, other: &Bound) -> bool {
        if self == other {
            return false;
        }
        match self.version.cmp(&other.version) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => !other.is_inclusive,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]",
            self.version,
            if self.is_inclusive {
                "inclusive"
            } else {
                "exclusive"
            }
        )
    }
}

impl SpecifierSet {
    /// Extract the continuous `(lower, upper)` range denoted by the set.
    ///
    /// "!=" and "===" clauses do not narrow the range. The result does not
    /// depend on clause order.
    pub fn bounds(&self) -> (Bound, Bound) {
        let mut lower = Bound::zero();
        let mut upper = Bound::positive_infinity();

        let mut raise_lower = |candidate: Bound| {
            if candidate.is_higher_than(&lower) {
                lower = candidate;
            }
        };
        let mut drop_upper = |candidate: Bound| {
            if candidate.is_lower_than(&upper) {
                upper = candidate;
            }
        };

        for specifier in self.specifiers() {
            match (specifier.operator, &specifier.pattern) {
                (Operator::GreaterThanOrEqual, VersionPattern::Exact(version)) => {
                    raise_lower(Bound::new(version.clone(), true));
                }
                (Operator::GreaterThan, VersionPattern::Exact(version)) => {
                    raise_lower(Bound::new(version.clone(), false));
                }
                (Operator::LessThanOrEqual, VersionPattern::Exact(version)) => {
                    drop_upper(Bound::new(version.clone(), true));
                }
                (Operator::LessThan, VersionPattern::Exact(version)) => {
                    drop_upper(Bound::new(version.clone(), false));
                }
                (Operator::Equal, VersionPattern::Exact(version)) => {
                    raise_lower(Bound::new(version.clone(), true));
                    drop_upper(Bound::new(version.clone(), true));
                }
                (Operator::Equal, VersionPattern::Wildcard { epoch, release }) => {
                    raise_lower(Bound::new(prefix_floor(*epoch, release), true));
                    drop_upper(Bound::new(prefix_ceiling(*epoch, release), false));
                }
                (Operator::Compatible, VersionPattern::Exact(version)) => {
                    raise_lower(Bound::new(version.clone(), true));
                    let prefix = &version.release()[..version.release().len() - 1];
                    drop_upper(Bound::new(prefix_ceiling(version.epoch(), prefix), false));
                }
                // Exclusions and arbitrary equality leave the range as is.
                _ => {}
            }
        }

        (lower, upper)
    }

    /// Indicate whether the ranges of both sets intersect.
    ///
    /// The check is commutative and errs on the permissive side: "!="
    /// clauses never make two ranges disjoint.
    pub fn is_overlapping(&self, other: &SpecifierSet) -> bool {
        let (lower_a, upper_a) = self.bounds();
        let (lower_b, upper_b) = other.bounds();

        let lower = if lower_b.is_higher_than(&lower_a) {
            lower_b
        } else {
            lower_a
        };
        let upper = if upper_b.is_lower_than(&upper_a) {
            upper_b
        } else {
            upper_a
        };

        match lower.version().cmp(upper.version()) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => lower.is_inclusive() && upper.is_inclusive(),
            std::cmp::Ordering::Greater => false,
        }
    }
}

// Smallest version carrying the wildcard prefix (the "3.*" floor is
// "3.dev0").
fn prefix_floor(epoch: u64, release: &[u64]) -> Version {
    Version::from_parts(epoch, release.to_vec(), Some(0))
}

// First version above every version carrying the prefix.
fn prefix_ceiling(epoch: u64, release: &[u64]) -> Version {
    let mut bumped = release.to_vec();
    if let Some(last) = bumped.last_mut() {
        *last += 1;
    }
    Version::from_parts(epoch, bumped, Some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifiers(content: &str) -> SpecifierSet {
        SpecifierSet::parse(content).unwrap()
    }

    #[test]
    fn test_bounds_ordered() {
        let (lower, upper) = specifiers(">=10, <11").bounds();
        assert_eq!(lower.version().to_string(), "10");
        assert!(lower.is_inclusive());
        assert_eq!(upper.version().to_string(), "11");
        assert!(!upper.is_inclusive());
    }

    #[test]
    fn test_bounds_unconstrained() {
        let (lower, upper) = specifiers("").bounds();
        assert_eq!(lower, Bound::zero());
        assert_eq!(upper, Bound::positive_infinity());
    }

    #[test]
    fn test_bounds_order_independent() {
        assert_eq!(specifiers(">=1, <2, >0.5").bounds(), specifiers(">0.5, <2, >=1").bounds());
    }

    #[test]
    fn test_overlapping() {
        assert!(specifiers(">=1, <3").is_overlapping(&specifiers(">=2, <4")));
        assert!(!specifiers(">=1, <2").is_overlapping(&specifiers(">=2, <4")));
        assert!(specifiers(">=1, <=2").is_overlapping(&specifiers(">=2, <4")));
        assert!(specifiers("==1.5").is_overlapping(&specifiers(">=1, <2")));
    }

    #[test]
    fn test_overlapping_commutative() {
        let cases = [(">=1, <3", ">=2"), ("<1", ">2"), ("==2.*", ">=2.5")];
        for (left, right) in cases {
            assert_eq!(
                specifiers(left).is_overlapping(&specifiers(right)),
                specifiers(right).is_overlapping(&specifiers(left)),
                "commutativity broken for {} / {}",
                left,
                right
            );
        }
    }

    #[test]
    fn test_overlapping_wildcard() {
        assert!(!specifiers(">=2.7, <2.8").is_overlapping(&specifiers("==3.*")));
        assert!(specifiers(">=3.7, <3.8").is_overlapping(&specifiers("==3.*")));
    }

    #[test]
    fn test_overlapping_compatible() {
        assert!(specifiers("~=2.2").is_overlapping(&specifiers(">=2.5")));
        assert!(!specifiers("~=2.2").is_overlapping(&specifiers(">=3")));
    }
}
