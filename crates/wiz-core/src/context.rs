//! Resolved context extraction and encoding

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::environ;
use crate::error::{Result, WizError};
use crate::graph::resolver::{Resolver, ResolverContext, ResolveOptions};
use crate::package::{combine_command_mapping, combine_environ_mapping, Package};
use crate::registry::Index;
use wiz_version::Requirement;

/// Environment variable embedding the encoded context
pub const WIZ_CONTEXT: &str = "WIZ_CONTEXT";

/// A resolved context: ordered packages with the merged environment and
/// command mappings, and the registries they came from.
#[derive(Debug)]
pub struct Context {
    /// Resolved packages, ordered by ascending distance from the root
    pub packages: Vec<Arc<Package>>,

    /// Merged environment variable mapping
    pub environ: IndexMap<String, String>,

    /// Merged command alias mapping
    pub command: IndexMap<String, String>,

    /// Registry paths the definitions were discovered in
    pub registries: Vec<PathBuf>,
}

/// Serializable summary of one resolved package
#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub definition_path: PathBuf,
    pub registry_path: PathBuf,
}

impl Context {
    /// Return serializable summaries of the resolved packages
    pub fn summaries(&self) -> Vec<PackageSummary> {
        self.packages
            .iter()
            .map(|package| PackageSummary {
                identifier: package.identifier().to_string(),
                version: package.version().map(|version| version.to_string()),
                variant: package.variant().map(str::to_string),
                definition_path: package.definition_path().to_path_buf(),
                registry_path: package.registry_path().to_path_buf(),
            })
            .collect()
    }
}

/// Resolve *requests* into a context.
///
/// Implicit package requirements are prepended to the requests unless
/// disabled, so that auto-use packages keep a higher priority than explicit
/// ones. The merged environment starts from *environ_mapping* when given;
/// packages are folded deepest-first so that packages closest to the root
/// override or augment the values of their dependencies.
pub fn resolve_context(
    requests: &[String],
    index: &Index,
    options: ResolveOptions,
    environ_mapping: Option<IndexMap<String, String>>,
) -> Result<Context> {
    let mut requirements: Vec<Requirement> = Vec::new();

    if options.include_implicit {
        requirements.extend(index.implicit_requirements()?);
    }

    for request in requests {
        requirements.push(Requirement::parse(request)?);
    }

    let resolver_context = ResolverContext::new(index, options);
    let mut resolver = Resolver::new(&resolver_context);
    let packages = resolver.compute_packages(&requirements)?;

    let mut environ = environ_mapping.unwrap_or_default();
    let mut command = IndexMap::new();

    for package in packages.iter().rev() {
        environ = combine_environ_mapping(
            package.identifier(),
            &environ,
            &package.localized_environ(),
        );
        command = combine_command_mapping(package.identifier(), &command, package.command());
    }

    let mut environ = environ::sanitise(&environ);

    let registries = index.registries().to_vec();
    let identifiers: Vec<String> = packages
        .iter()
        .map(|package| package.identifier().to_string())
        .collect();
    environ.insert(WIZ_CONTEXT.to_string(), encode_context(&identifiers, &registries));

    Ok(Context {
        packages,
        environ,
        command,
        registries,
    })
}

#[derive(Serialize, Deserialize)]
struct ContextPayload {
    registries: Vec<PathBuf>,
    packages: Vec<String>,
}

/// Encode package identifiers and registries into a `WIZ_CONTEXT` value
pub fn encode_context(identifiers: &[String], registries: &[PathBuf]) -> String {
    let payload = ContextPayload {
        registries: registries.to_vec(),
        packages: identifiers.to_vec(),
    };

    // The payload is a plain value type; serialization cannot fail.
    let serialized = serde_json::to_vec(&payload).unwrap_or_default();
    BASE64.encode(serialized)
}

/// Decode a `WIZ_CONTEXT` value into package identifiers and registries
pub fn decode_context(value: &str) -> Result<(Vec<String>, Vec<PathBuf>)> {
    let serialized = BASE64
        .decode(value)
        .map_err(|error| WizError::ContextDecode(error.to_string()))?;

    let payload: ContextPayload = serde_json::from_slice(&serialized)
        .map_err(|error| WizError::ContextDecode(error.to_string()))?;

    Ok((payload.packages, payload.registries))
}

/// Reconstitute the encoded context from the current environment.
///
/// Returns the package identifiers and registries recorded by a previous
/// resolution, without re-resolving.
pub fn discover_context() -> Result<(Vec<String>, Vec<PathBuf>)> {
    let value = std::env::var(WIZ_CONTEXT)
        .map_err(|_| WizError::ContextDecode(format!("{} is not set", WIZ_CONTEXT)))?;
    decode_context(&value)
}
