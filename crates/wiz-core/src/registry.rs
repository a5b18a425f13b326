//! Definition discovery and the registry index

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};

use crate::definition::Definition;
use crate::error::{Result, WizError};
use crate::system::System;
use wiz_version::{Requirement, Version, NAMESPACE_SEPARATOR};

/// Discover and return all definitions found under *paths*.
///
/// Each path is walked recursively (up to *max_depth* when given) for
/// ".json" definition files. Files which cannot be loaded, definitions
/// flagged as disabled and definitions incompatible with *system* are
/// logged and skipped.
pub fn discover(paths: &[PathBuf], system: &System, max_depth: Option<usize>) -> Vec<Definition> {
    let mut definitions = Vec::new();

    for path in paths {
        log::debug!("Searching under {:?} for definition files", path);

        let mut walker = walkdir::WalkDir::new(path).sort_by_file_name();
        if let Some(depth) = max_depth {
            walker = walker.max_depth(depth + 1);
        }

        for entry in walker.into_iter().filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file()
                || entry.path().extension().map(|ext| ext != "json").unwrap_or(true)
            {
                continue;
            }

            let definition = match Definition::load(entry.path(), path) {
                Ok(definition) => definition,
                Err(error) => {
                    log::warn!(
                        "Error occurred trying to load definition from {:?}: {}",
                        entry.path(),
                        error
                    );
                    continue;
                }
            };

            if definition.disabled() {
                log::warn!(
                    "Definition '{}' is disabled",
                    definition.qualified_version_identifier()
                );
                continue;
            }

            match definition.system().map(|filter| system.is_compatible(filter)) {
                Some(Ok(false)) => continue,
                Some(Err(error)) => {
                    log::warn!(
                        "Definition '{}' has an incorrect system filter: {}",
                        definition.qualified_version_identifier(),
                        error
                    );
                    continue;
                }
                _ => {}
            }

            definitions.push(definition);
        }
    }

    definitions
}

// Versions of one qualified identifier; flags record whether versioned and
// unversioned definitions were mixed.
#[derive(Debug, Clone, Default)]
struct VersionMap {
    versions: BTreeMap<Version, Definition>,
    has_versioned: bool,
    has_unversioned: bool,
}

/// Index of all discovered definitions.
///
/// Lookup tables are keyed by namespace-qualified name; versions are kept in
/// descending order so that the latest matching one wins.
#[derive(Debug, Clone, Default)]
pub struct Index {
    packages: IndexMap<String, VersionMap>,
    commands: IndexMap<String, String>,
    namespaces: IndexMap<String, IndexSet<String>>,
    implicit: IndexMap<String, Definition>,
    registries: Vec<PathBuf>,
}

impl Index {
    /// Build an index from discovered *definitions*
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = Definition>,
        registries: Vec<PathBuf>,
    ) -> Self {
        let mut index = Index {
            registries,
            ..Default::default()
        };

        for definition in definitions {
            index.add(definition);
        }

        index
    }

    /// Discover definitions under *paths* and build the index
    pub fn from_registries(paths: &[PathBuf], system: &System) -> Self {
        Index::from_definitions(discover(paths, system, None), paths.to_vec())
    }

    fn add(&mut self, definition: Definition) {
        let qualified = definition.qualified_identifier();

        if let Some(namespace) = definition.namespace() {
            self.namespaces
                .entry(definition.identifier().to_string())
                .or_default()
                .insert(namespace.to_string());
        }

        for command in definition.command().keys() {
            if let Some(previous) = self.commands.insert(command.clone(), qualified.clone()) {
                if previous != qualified {
                    log::debug!(
                        "Command '{}' now targets '{}' instead of '{}'",
                        command,
                        qualified,
                        previous
                    );
                }
            }
        }

        if definition.auto_use() {
            match self.implicit.get(&qualified) {
                Some(existing) if existing.ordered_version() >= definition.ordered_version() => {}
                _ => {
                    self.implicit.insert(qualified.clone(), definition.clone());
                }
            }
        }

        let entry = self.packages.entry(qualified).or_default();
        if definition.version().is_some() {
            entry.has_versioned = true;
        } else {
            entry.has_unversioned = true;
        }
        entry.versions.insert(definition.ordered_version(), definition);
    }

    /// Return the registry paths the index was built from
    pub fn registries(&self) -> &[PathBuf] {
        &self.registries
    }

    /// Return implicit package requirements.
    ///
    /// Every auto-use definition contributes its latest version, in reverse
    /// order of discovery so that later registries take priority.
    pub fn implicit_requirements(&self) -> Result<Vec<Requirement>> {
        self.implicit
            .values()
            .rev()
            .map(|definition| {
                Requirement::parse(&definition.qualified_version_identifier()).map_err(|error| {
                    WizError::IncorrectDefinition {
                        identifier: definition.qualified_identifier(),
                        message: error.to_string(),
                    }
                })
            })
            .collect()
    }

    /// Return known namespaces for a bare *name*
    pub fn namespaces_for(&self, name: &str) -> Option<&IndexSet<String>> {
        self.namespaces.get(name)
    }

    /// Return the qualified identifier targeted by *command*
    pub fn fetch_from_command(&self, command: &str) -> Option<&str> {
        self.commands.get(command).map(String::as_str)
    }

    /// Return the best matching definition for *requirement*.
    ///
    /// The namespace is resolved first (see [`Index::resolve_namespace`]),
    /// then the highest version satisfying the specifier set is selected.
    /// When the requirement pins a variant, versions which do not declare it
    /// are skipped.
    pub fn fetch(
        &self,
        requirement: &Requirement,
        namespace_hints: &IndexSet<String>,
        namespace_counter: &IndexMap<String, usize>,
    ) -> Result<&Definition> {
        let qualified = self.resolve_namespace(requirement, namespace_hints, namespace_counter)?;

        let entry = self
            .packages
            .get(&qualified)
            .ok_or_else(|| WizError::RequestNotFound(requirement.to_string()))?;

        if entry.has_versioned && entry.has_unversioned {
            return Err(WizError::RequestNotFound(format!(
                "Impossible to retrieve the best matching definition for '{}' as \
                 non-versioned and versioned definitions have been fetched",
                qualified
            )));
        }

        for definition in entry.versions.values().rev() {
            if !requirement.matches_version(&definition.ordered_version()) {
                continue;
            }

            // Descend to an older version when the pinned variant is absent.
            if let Some(variant) = requirement.variant() {
                if definition.variant(variant).is_none() {
                    continue;
                }
            }

            return Ok(definition);
        }

        Err(WizError::RequestNotFound(requirement.to_string()))
    }

    /// Resolve the qualified identifier targeted by *requirement*.
    ///
    /// Resolution order: explicit namespace, then bare identifier when
    /// indexed, then the single known namespace, then a namespace equal to
    /// the bare name, then the hinted namespace with the highest counter
    /// value (ties break lexicographically).
    pub fn resolve_namespace(
        &self,
        requirement: &Requirement,
        namespace_hints: &IndexSet<String>,
        namespace_counter: &IndexMap<String, usize>,
    ) -> Result<String> {
        if requirement.namespace().is_some() {
            return Ok(requirement.qualified_name());
        }

        let name = requirement.name();
        if self.packages.contains_key(name) {
            return Ok(name.to_string());
        }

        let known = self
            .namespaces
            .get(name)
            .ok_or_else(|| WizError::RequestNotFound(requirement.to_string()))?;

        if known.len() == 1 {
            if let Some(namespace) = known.iter().next() {
                return Ok(format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, name));
            }
        }

        if known.contains(name) {
            return Ok(format!("{}{}{}", name, NAMESPACE_SEPARATOR, name));
        }

        let mut candidates: Vec<&String> = known
            .iter()
            .filter(|namespace| namespace_hints.contains(namespace.as_str()))
            .collect();

        if !candidates.is_empty() {
            candidates.sort_by(|left, right| {
                let left_count = namespace_counter.get(left.as_str()).copied().unwrap_or(0);
                let right_count = namespace_counter.get(right.as_str()).copied().unwrap_or(0);
                right_count.cmp(&left_count).then_with(|| left.cmp(right))
            });
            let namespace = candidates[0];
            return Ok(format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, name));
        }

        let mut namespaces: Vec<&str> = known.iter().map(String::as_str).collect();
        namespaces.sort_unstable();

        Err(WizError::AmbiguousNamespace {
            name: name.to_string(),
            namespaces: namespaces.join(", "),
        })
    }

    /// Translate a command request into the corresponding package request.
    ///
    /// The specifier set and variant selector carry over, so requesting the
    /// command "hiero ==10.5.*" yields the package request "nuke ==10.5.*".
    pub fn fetch_package_request_from_command(&self, request: &str) -> Result<Requirement> {
        let requirement = Requirement::parse(request)?;

        let qualified = self
            .fetch_from_command(requirement.name())
            .ok_or_else(|| WizError::CommandNotFound(requirement.name().to_string()))?;

        let mut content = qualified.to_string();
        if let Some(variant) = requirement.variant() {
            content.push_str(&format!("[{}]", variant));
        }
        if !requirement.specifiers().is_empty() {
            content.push_str(&format!(" {}", requirement.specifiers()));
        }

        Requirement::parse(&content).map_err(WizError::Requirement)
    }
}
