//! PEP 440 version handling for the Wiz environment framework
//!
//! This crate provides version parsing, comparison, specifier-set matching
//! and requirement parsing, including the namespace (`maya::mtoa`) and
//! variant (`numpy[2.7]`) extensions used by package definitions.

mod bound;
mod requirement;
mod specifier;
mod version;

pub use bound::Bound;
pub use requirement::{Requirement, RequirementError, NAMESPACE_SEPARATOR};
pub use specifier::{Operator, Specifier, SpecifierSet};
pub use version::{LocalSegment, PreReleaseKind, Version, VersionError};
