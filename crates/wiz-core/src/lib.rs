//! Environment management core for Wiz
//!
//! Given a list of package requests, this crate produces a deterministic
//! context: an ordered list of resolved packages together with merged
//! environment-variable and command-alias mappings. Definitions are
//! discovered from registry directories, indexed per qualified identifier
//! and version, and resolved through a dependency graph which handles
//! version conflicts, conditional packages and variant combinations.

pub mod context;
pub mod definition;
pub mod environ;
pub mod error;
pub mod graph;
pub mod history;
pub mod package;
pub mod registry;
pub mod system;

pub use context::{
    decode_context, discover_context, encode_context, resolve_context, Context, PackageSummary,
    WIZ_CONTEXT,
};
pub use definition::{Definition, VariantDecl};
pub use error::{Conflict, NodeError, ResolutionError, Result, WizError};
pub use graph::resolver::{ResolveOptions, Resolver, ResolverContext};
pub use graph::{Graph, Node, ROOT};
pub use history::{Action, History};
pub use package::{Package, INSTALL_LOCATION, INSTALL_ROOT};
pub use registry::{discover, Index};
pub use system::{System, SystemFilter};
