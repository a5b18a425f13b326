//! Package materialization from definitions

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::definition::Definition;
use crate::environ;
use crate::error::{Result, WizError};
use crate::registry::Index;
use wiz_version::{Requirement, Version, NAMESPACE_SEPARATOR};

/// Environment variable corresponding to the 'install-location' key
pub const INSTALL_LOCATION: &str = "INSTALL_LOCATION";

/// Environment variable corresponding to the 'install-root' key
pub const INSTALL_ROOT: &str = "INSTALL_ROOT";

/// A package materialized from a definition at one version, with at most
/// one variant applied.
///
/// Packages are immutable and shared by reference within the graph.
#[derive(Debug)]
pub struct Package {
    identifier: String,
    definition_identifier: String,
    name: String,
    namespace: Option<String>,
    version: Option<Version>,
    variant: Option<String>,
    description: Option<String>,
    environ: IndexMap<String, String>,
    command: IndexMap<String, String>,
    requirements: Vec<Requirement>,
    conditions: Vec<Requirement>,
    install_location: Option<String>,
    install_root: Option<String>,
    registry_path: PathBuf,
    definition_path: PathBuf,
}

impl Package {
    /// Return the qualified package identifier
    /// (e.g. "maya::mtoa[2020]==2.1.0")
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Return the qualified identifier of the source definition
    pub fn definition_identifier(&self) -> &str {
        &self.definition_identifier
    }

    /// Return the package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the package namespace, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Return the package version, if any
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    // Version used when matching specifiers; unversioned packages order as
    // "0!0".
    fn ordered_version(&self) -> Version {
        self.version
            .clone()
            .unwrap_or_else(|| Version::parse("0!0").unwrap_or_else(|_| Version::zero()))
    }

    /// Return the applied variant identifier, if any
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Return the description, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Return the environment mapping
    pub fn environ(&self) -> &IndexMap<String, String> {
        &self.environ
    }

    /// Return the command mapping
    pub fn command(&self) -> &IndexMap<String, String> {
        &self.command
    }

    /// Return the package requirements
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Return the package conditions
    pub fn conditions(&self) -> &[Requirement] {
        &self.conditions
    }

    /// Return the path of the registry the definition was discovered in
    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    /// Return the path of the source definition file
    pub fn definition_path(&self) -> &Path {
        &self.definition_path
    }

    /// Check whether the package satisfies *requirement*.
    ///
    /// The name and, when set, the namespace and variant selector must match
    /// exactly; the version must satisfy the specifier set.
    pub fn satisfies(&self, requirement: &Requirement) -> bool {
        if requirement.name() != self.name {
            return false;
        }
        if let Some(namespace) = requirement.namespace() {
            if self.namespace.as_deref() != Some(namespace) {
                return false;
            }
        }
        if let Some(variant) = requirement.variant() {
            if self.variant.as_deref() != Some(variant) {
                return false;
            }
        }

        requirement.matches_version(&self.ordered_version())
    }

    /// Return the environment mapping with install paths resolved.
    ///
    /// "${INSTALL_ROOT}" references within the install location are expanded
    /// first, then "${INSTALL_LOCATION}" references within each value.
    pub fn localized_environ(&self) -> IndexMap<String, String> {
        let location = match (&self.install_location, &self.install_root) {
            (Some(location), Some(root)) => {
                let mut mapping = IndexMap::new();
                mapping.insert(INSTALL_ROOT.to_string(), root.clone());
                Some(environ::substitute(location, &mapping))
            }
            (Some(location), None) => Some(location.clone()),
            _ => None,
        };

        match location {
            Some(location) => {
                let mut mapping = IndexMap::new();
                mapping.insert(INSTALL_LOCATION.to_string(), location);

                self.environ
                    .iter()
                    .map(|(key, value)| (key.clone(), environ::substitute(value, &mapping)))
                    .collect()
            }
            None => self.environ.clone(),
        }
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.definition_path == other.definition_path
    }
}

impl Eq for Package {}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}

/// Create a package from *definition*, applying *variant* when given.
///
/// Variant content overlays the definition content: environment and command
/// values override per key, requirements are appended.
pub fn create(definition: &Definition, variant: Option<&str>) -> Result<Package> {
    let mut environ = definition.environ().clone();
    let mut command = definition.command().clone();
    let mut requirements = definition.requirements()?.to_vec();
    let mut install_location = definition.install_location().map(str::to_string);

    let mut identifier = definition.identifier().to_string();

    if let Some(variant_identifier) = variant {
        let declaration = definition.variant(variant_identifier).ok_or_else(|| {
            WizError::RequestNotFound(format!(
                "The variant '{}' could not be resolved for {}",
                variant_identifier, definition
            ))
        })?;

        identifier.push_str(&format!("[{}]", variant_identifier));

        // Variant values override per key; references stay literal until the
        // context merge resolves them.
        for (key, value) in declaration.environ() {
            environ.insert(key.clone(), value.clone());
        }
        for (key, value) in declaration.command() {
            command.insert(key.clone(), value.clone());
        }
        requirements.extend(declaration.requirements()?.iter().cloned());

        if declaration.install_location().is_some() {
            install_location = declaration.install_location().map(str::to_string);
        }
    }

    if let Some(version) = definition.version() {
        identifier.push_str(&format!("=={}", version));
    }

    if let Some(namespace) = definition.namespace() {
        identifier = format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, identifier);
    }

    Ok(Package {
        identifier,
        definition_identifier: definition.qualified_identifier(),
        name: definition.identifier().to_string(),
        namespace: definition.namespace().map(str::to_string),
        version: definition.version().cloned(),
        variant: variant.map(str::to_string),
        description: definition.description().map(str::to_string),
        environ,
        command,
        requirements,
        conditions: definition.conditions()?.to_vec(),
        install_location,
        install_root: definition.install_root().map(str::to_string),
        registry_path: definition.registry_path().to_path_buf(),
        definition_path: definition.definition_path().to_path_buf(),
    })
}

/// Cache of materialized packages, keyed by definition and variant
#[derive(Debug, Default)]
pub struct PackageCache {
    inner: RefCell<HashMap<(String, String), Arc<Package>>>,
}

impl PackageCache {
    fn get_or_create(&self, definition: &Definition, variant: Option<&str>) -> Result<Arc<Package>> {
        let key = (
            definition.qualified_version_identifier(),
            variant.unwrap_or_default().to_string(),
        );

        if let Some(package) = self.inner.borrow().get(&key) {
            return Ok(package.clone());
        }

        let package = Arc::new(create(definition, variant)?);
        self.inner.borrow_mut().insert(key, package.clone());
        Ok(package)
    }
}

/// Extract packages matching *requirement* from the registry index.
///
/// The best matching definition version is materialized. When the
/// definition declares variants and the requirement does not pin one, one
/// package per variant is returned, in declared order.
pub fn extract(
    requirement: &Requirement,
    index: &Index,
    namespace_hints: &IndexSet<String>,
    namespace_counter: &IndexMap<String, usize>,
    cache: &PackageCache,
) -> Result<Vec<Arc<Package>>> {
    let definition = index.fetch(requirement, namespace_hints, namespace_counter)?;

    if let Some(variant) = requirement.variant() {
        return Ok(vec![cache.get_or_create(definition, Some(variant))?]);
    }

    if definition.variants().is_empty() {
        return Ok(vec![cache.get_or_create(definition, None)?]);
    }

    definition
        .variants()
        .iter()
        .map(|variant| cache.get_or_create(definition, Some(variant.identifier())))
        .collect()
}

/// Return combined environ mapping from *mapping1* and *mapping2*.
///
/// Values from *mapping2* referencing a variable of the same name are
/// augmented with the previous value; other collisions are overridden with
/// a warning. References to further *mapping1* variables are substituted.
pub fn combine_environ_mapping(
    identifier: &str,
    mapping1: &IndexMap<String, String>,
    mapping2: &IndexMap<String, String>,
) -> IndexMap<String, String> {
    let mut combined = IndexMap::new();

    for (key, value) in mapping1 {
        match mapping2.get(key) {
            Some(update) => {
                if !environ::contains(update, key) {
                    log::warn!(
                        "The '{}' variable is being overridden in '{}'",
                        key,
                        identifier
                    );
                }
                combined.insert(key.clone(), environ::substitute(update, mapping1));
            }
            None => {
                combined.insert(key.clone(), value.clone());
            }
        }
    }

    for (key, value) in mapping2 {
        if !combined.contains_key(key) {
            combined.insert(key.clone(), environ::substitute(value, mapping1));
        }
    }

    combined
}

/// Return combined command mapping from *mapping1* and *mapping2*.
///
/// Commands from *mapping2* have priority.
pub fn combine_command_mapping(
    identifier: &str,
    mapping1: &IndexMap<String, String>,
    mapping2: &IndexMap<String, String>,
) -> IndexMap<String, String> {
    let mut combined = mapping1.clone();

    for (key, value) in mapping2 {
        if combined.contains_key(key) {
            log::debug!(
                "The '{}' command is being overridden in '{}'",
                key,
                identifier
            );
        }
        combined.insert(key.clone(), value.clone());
    }

    combined
}

/// Return requirement conflicts between two packages.
///
/// For each definition required by both packages, a conflict pair is
/// returned when the version ranges do not overlap.
pub fn check_conflicting_requirements(
    package1: &Package,
    package2: &Package,
) -> Vec<(Requirement, Requirement)> {
    let mut conflicts = Vec::new();

    for requirement1 in &package1.requirements {
        for requirement2 in &package2.requirements {
            if requirement1.qualified_name() != requirement2.qualified_name() {
                continue;
            }
            if !requirement1.is_overlapping(requirement2) {
                conflicts.push((requirement1.clone(), requirement2.clone()));
            }
        }
    }

    conflicts
}
