use std::path::PathBuf;

use thiserror::Error;
use wiz_version::{Requirement, RequirementError, VersionError};

#[derive(Error, Debug)]
pub enum WizError {
    // Definition errors
    #[error("The definition '{identifier}' is incorrect [{message}]")]
    IncorrectDefinition { identifier: String, message: String },

    #[error("The requirement '{0}' could not be resolved")]
    RequestNotFound(String),

    #[error("Impossible to guess default namespace for '{name}' [available: {namespaces}]")]
    AmbiguousNamespace { name: String, namespaces: String },

    #[error("No command named '{0}' can be found")]
    CommandNotFound(String),

    // Version and requirement parse errors
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Requirement(#[from] RequirementError),

    // System errors
    #[error("The current system is not supported: {0}")]
    CurrentSystem(String),

    // Graph resolution errors
    #[error(transparent)]
    GraphResolution(#[from] ResolutionError),

    // Context errors
    #[error("The context could not be decoded: {0}")]
    ContextDecode(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse definition from {path}: {message}")]
    DefinitionParse { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, WizError>;

/// A version conflict between requirements pointing to one definition.
///
/// Carries enough context for a caller to render the requirement pair with
/// the parent nodes holding each side.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// Requirement which is not overlapping with the other side.
    pub requirement: Requirement,
    /// Node identifiers of the parents holding `requirement`.
    pub parents: Vec<String>,
    /// Requirements from other parents which `requirement` conflicts with.
    pub conflicts_with: Vec<Requirement>,
    /// The combined requirement which failed extraction.
    pub combined: Requirement,
}

/// A parent whose requirement could not be relinked to any remaining node.
#[derive(Debug, Clone)]
pub struct NodeError {
    /// Identifier of the parent node recording the error.
    pub parent: String,
    pub message: String,
}

/// Errors raised while resolving a graph combination.
#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error("The dependency graph could not be resolved:\n{}", describe_conflicts(.0))]
    Conflicts(Vec<Conflict>),

    #[error("The dependency graph contains invalid nodes:\n{}", describe_node_errors(.0))]
    InvalidNodes(Vec<NodeError>),

    #[error("The dependency graph must be divided into variant combinations")]
    Variants,

    #[error("Failed to resolve graph at combination #{combinations}:\n\n{source}")]
    Exhausted {
        combinations: usize,
        #[source]
        source: Box<ResolutionError>,
    },
}

fn describe_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "  * {} [from {}] is incompatible with {}",
                conflict.requirement,
                conflict.parents.join(", "),
                conflict
                    .conflicts_with
                    .iter()
                    .map(|requirement| format!("'{}'", requirement))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_node_errors(errors: &[NodeError]) -> String {
    errors
        .iter()
        .map(|error| format!("  * {}: {}", error.parent, error.message))
        .collect::<Vec<_>>()
        .join("\n")
}
