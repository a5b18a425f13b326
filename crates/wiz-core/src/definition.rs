//! Package definition records loaded from registries

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WizError};
use crate::system::SystemFilter;
use wiz_version::{Requirement, Version, NAMESPACE_SEPARATOR};

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap();
}

/// Raw definition content, mirroring the JSON file format.
///
/// Unknown top-level keys are rejected; nested objects stay permissive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub(crate) struct DefinitionData {
    pub identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_use: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemFilter>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub command: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environ: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<VariantData>,
}

/// Raw variant content within a definition file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct VariantData {
    pub identifier: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environ: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub command: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_location: Option<String>,
}

/// An immutable package definition.
///
/// Definitions are discovered from registry directories and indexed per
/// qualified identifier and version. Requirement lists are parsed on first
/// access and memoized.
#[derive(Debug, Clone)]
pub struct Definition {
    data: DefinitionData,
    version: Option<Version>,
    variants: Vec<VariantDecl>,
    registry_path: PathBuf,
    definition_path: PathBuf,
    requirements: OnceCell<Vec<Requirement>>,
    conditions: OnceCell<Vec<Requirement>>,
}

impl Definition {
    pub(crate) fn new(
        data: DefinitionData,
        registry_path: &Path,
        definition_path: &Path,
    ) -> Result<Self> {
        validate(&data)?;

        let version = data
            .version
            .as_deref()
            .map(Version::parse)
            .transpose()
            .map_err(|error| WizError::IncorrectDefinition {
                identifier: data.identifier.clone(),
                message: error.to_string(),
            })?;

        let variants = data.variants.iter().cloned().map(VariantDecl::new).collect();

        Ok(Definition {
            data,
            version,
            variants,
            registry_path: registry_path.to_path_buf(),
            definition_path: definition_path.to_path_buf(),
            requirements: OnceCell::new(),
            conditions: OnceCell::new(),
        })
    }

    /// Load a definition from a JSON file
    pub fn load(path: &Path, registry_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let data: DefinitionData =
            serde_json::from_str(&content).map_err(|error| WizError::DefinitionParse {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?;

        Definition::new(data, registry_path, path)
    }

    /// Return the definition identifier
    pub fn identifier(&self) -> &str {
        &self.data.identifier
    }

    /// Return the definition namespace, if any
    pub fn namespace(&self) -> Option<&str> {
        self.data.namespace.as_deref()
    }

    /// Return qualified identifier with optional namespace
    pub fn qualified_identifier(&self) -> String {
        match &self.data.namespace {
            Some(namespace) => format!(
                "{}{}{}",
                namespace, NAMESPACE_SEPARATOR, self.data.identifier
            ),
            None => self.data.identifier.clone(),
        }
    }

    /// Return qualified identifier with version ("ns::foo==0.1.0")
    pub fn qualified_version_identifier(&self) -> String {
        match &self.version {
            Some(version) => format!("{}=={}", self.qualified_identifier(), version),
            None => self.qualified_identifier(),
        }
    }

    /// Return the parsed version, if declared
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Return the version used for ordering.
    ///
    /// A definition without version is treated as version "0!0" so that it
    /// stays orderable against versioned ones.
    pub fn ordered_version(&self) -> Version {
        self.version.clone().unwrap_or_else(|| {
            Version::parse("0!0").unwrap_or_else(|_| Version::zero())
        })
    }

    /// Return the description, if any
    pub fn description(&self) -> Option<&str> {
        self.data.description.as_deref()
    }

    /// Indicate whether the definition is disabled
    pub fn disabled(&self) -> bool {
        self.data.disabled
    }

    /// Indicate whether the definition should be used implicitly
    pub fn auto_use(&self) -> bool {
        self.data.auto_use
    }

    /// Return the install location, if any
    pub fn install_location(&self) -> Option<&str> {
        self.data.install_location.as_deref()
    }

    /// Return the install root, if any
    pub fn install_root(&self) -> Option<&str> {
        self.data.install_root.as_deref()
    }

    /// Return the system filter, if any
    pub fn system(&self) -> Option<&SystemFilter> {
        self.data.system.as_ref()
    }

    /// Return the command mapping
    pub fn command(&self) -> &IndexMap<String, String> {
        &self.data.command
    }

    /// Return the environment mapping
    pub fn environ(&self) -> &IndexMap<String, String> {
        &self.data.environ
    }

    /// Return parsed requirements, memoized on first access
    pub fn requirements(&self) -> Result<&[Requirement]> {
        self.requirements
            .get_or_try_init(|| self.parse_requirements(&self.data.requirements))
            .map(Vec::as_slice)
    }

    /// Return parsed conditions, memoized on first access
    pub fn conditions(&self) -> Result<&[Requirement]> {
        self.conditions
            .get_or_try_init(|| self.parse_requirements(&self.data.conditions))
            .map(Vec::as_slice)
    }

    /// Return the variant declarations
    pub fn variants(&self) -> &[VariantDecl] {
        &self.variants
    }

    /// Return the declared variant matching *identifier*
    pub fn variant(&self, identifier: &str) -> Option<&VariantDecl> {
        self.variants
            .iter()
            .find(|variant| variant.identifier() == identifier)
    }

    /// Return the path of the registry the definition was discovered in
    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    /// Return the path of the definition file
    pub fn definition_path(&self) -> &Path {
        &self.definition_path
    }

    fn parse_requirements(&self, contents: &[String]) -> Result<Vec<Requirement>> {
        contents
            .iter()
            .map(|content| {
                Requirement::parse(content).map_err(|error| WizError::IncorrectDefinition {
                    identifier: self.qualified_version_identifier(),
                    message: error.to_string(),
                })
            })
            .collect()
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.qualified_identifier())?;
        if let Some(version) = &self.version {
            write!(f, " [{}]", version)?;
        }
        Ok(())
    }
}

/// A variant declaration within a definition.
///
/// Variants overlay the global definition content on materialization; they
/// are declarations, not packages.
#[derive(Debug, Clone)]
pub struct VariantDecl {
    data: VariantData,
    requirements: OnceCell<Vec<Requirement>>,
}

impl VariantDecl {
    fn new(data: VariantData) -> Self {
        VariantDecl {
            data,
            requirements: OnceCell::new(),
        }
    }

    /// Return the variant identifier
    pub fn identifier(&self) -> &str {
        &self.data.identifier
    }

    /// Return the variant environment mapping
    pub fn environ(&self) -> &IndexMap<String, String> {
        &self.data.environ
    }

    /// Return the variant command mapping
    pub fn command(&self) -> &IndexMap<String, String> {
        &self.data.command
    }

    /// Return the variant install location, if any
    pub fn install_location(&self) -> Option<&str> {
        self.data.install_location.as_deref()
    }

    /// Return parsed variant requirements, memoized on first access
    pub fn requirements(&self) -> Result<&[Requirement]> {
        self.requirements
            .get_or_try_init(|| {
                self.data
                    .requirements
                    .iter()
                    .map(|content| {
                        Requirement::parse(content).map_err(|error| {
                            WizError::IncorrectDefinition {
                                identifier: self.data.identifier.clone(),
                                message: error.to_string(),
                            }
                        })
                    })
                    .collect()
            })
            .map(Vec::as_slice)
    }
}

fn validate(data: &DefinitionData) -> Result<()> {
    let incorrect = |message: String| WizError::IncorrectDefinition {
        identifier: data.identifier.clone(),
        message,
    };

    if !IDENTIFIER_RE.is_match(&data.identifier) {
        return Err(WizError::IncorrectDefinition {
            identifier: data.identifier.clone(),
            message: "identifier must be a non-empty alphanumeric string".to_string(),
        });
    }

    if let Some(namespace) = &data.namespace {
        let valid = !namespace.is_empty()
            && namespace
                .split(NAMESPACE_SEPARATOR)
                .all(|segment| IDENTIFIER_RE.is_match(segment));
        if !valid {
            return Err(incorrect(format!("namespace '{}' is incorrect", namespace)));
        }
    }

    for variant in &data.variants {
        if !IDENTIFIER_RE.is_match(&variant.identifier) {
            return Err(incorrect(format!(
                "variant identifier '{}' is incorrect",
                variant.identifier
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn definition_from_json(content: &str) -> Result<Definition> {
        let data: DefinitionData = serde_json::from_str(content).map_err(|error| {
            WizError::DefinitionParse {
                path: PathBuf::from("/registry/definition.json"),
                message: error.to_string(),
            }
        })?;
        Definition::new(
            data,
            Path::new("/registry"),
            Path::new("/registry/definition.json"),
        )
    }

    #[test]
    fn test_minimal() {
        let definition = definition_from_json(r#"{"identifier": "foo"}"#).unwrap();
        assert_eq!(definition.identifier(), "foo");
        assert_eq!(definition.qualified_identifier(), "foo");
        assert_eq!(definition.version(), None);
        assert!(!definition.disabled());
        assert!(!definition.auto_use());
    }

    #[test]
    fn test_qualified_identifiers() {
        let definition = definition_from_json(
            r#"{"identifier": "mtoa", "namespace": "maya", "version": "2.1.0"}"#,
        )
        .unwrap();
        assert_eq!(definition.qualified_identifier(), "maya::mtoa");
        assert_eq!(definition.qualified_version_identifier(), "maya::mtoa==2.1.0");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(definition_from_json(r#"{"identifier": "foo", "unexpected": true}"#).is_err());
    }

    #[test]
    fn test_incorrect_identifier() {
        assert!(definition_from_json(r#"{"identifier": "foo bar"}"#).is_err());
        assert!(definition_from_json(r#"{"identifier": ""}"#).is_err());
    }

    #[test]
    fn test_incorrect_version() {
        assert!(definition_from_json(r#"{"identifier": "foo", "version": "incorrect"}"#).is_err());
    }

    #[test]
    fn test_incorrect_type() {
        assert!(definition_from_json(r#"{"identifier": "foo", "requirements": "bar"}"#).is_err());
        assert!(definition_from_json(r#"{"identifier": "foo", "environ": []}"#).is_err());
    }

    #[test]
    fn test_requirements_memoized() {
        let definition = definition_from_json(
            r#"{"identifier": "foo", "requirements": ["bar >=1, <2", "baz"]}"#,
        )
        .unwrap();

        let requirements = definition.requirements().unwrap();
        assert_eq!(requirements.len(), 2);
        assert_eq!(requirements[0].to_string(), "bar >=1, <2");

        // Second access returns the same parsed slice.
        assert_eq!(definition.requirements().unwrap().len(), 2);
    }

    #[test]
    fn test_incorrect_requirement_surfaces_identifier() {
        let definition = definition_from_json(
            r#"{"identifier": "foo", "version": "0.1.0", "requirements": ["bar >="]}"#,
        )
        .unwrap();

        let error = definition.requirements().unwrap_err();
        assert!(error.to_string().contains("foo==0.1.0"));
    }

    #[test]
    fn test_variants() {
        let definition = definition_from_json(
            r#"{
                "identifier": "numpy",
                "version": "1.16.6",
                "variants": [
                    {"identifier": "3.7", "requirements": ["python >=3.7, <3.8"]},
                    {"identifier": "2.7", "requirements": ["python >=2.7, <2.8"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(definition.variants().len(), 2);
        assert_eq!(definition.variants()[0].identifier(), "3.7");
        assert!(definition.variant("2.7").is_some());
        assert!(definition.variant("3.5").is_none());

        let requirements = definition.variants()[1].requirements().unwrap();
        assert_eq!(requirements[0].to_string(), "python >=2.7, <2.8");
    }
}
