//! Package dependency graph
//!
//! Requested packages are added recursively as [`Node`] instances, traversed
//! breadth-first so that errors are recorded in coherent order. Each link
//! carries the requirement which created it and a weight reflecting the
//! position of the child among its parent's dependencies.

pub mod combination;
pub mod distance;
pub mod resolver;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::error::{Result, WizError};
use crate::history::Action;
use crate::package::Package;
use self::resolver::ResolverContext;
use wiz_version::Requirement;

/// Identify the root of the graph
pub const ROOT: &str = "root";

/// Representation of a package within the graph.
///
/// It encapsulates one package with the identifiers of all parent nodes.
#[derive(Debug, Clone)]
pub struct Node {
    package: Arc<Package>,
    parents: IndexSet<String>,
}

impl Node {
    fn new(package: Arc<Package>) -> Self {
        Node {
            package,
            parents: IndexSet::new(),
        }
    }

    /// Return the node identifier (same as the package identifier)
    pub fn identifier(&self) -> &str {
        self.package.identifier()
    }

    /// Return the qualified identifier of the source definition
    pub fn definition_identifier(&self) -> &str {
        self.package.definition_identifier()
    }

    /// Return the embedded package
    pub fn package(&self) -> &Arc<Package> {
        &self.package
    }

    /// Return identifiers of all parent nodes
    pub fn parents(&self) -> &IndexSet<String> {
        &self.parents
    }

    fn add_parent(&mut self, identifier: &str) {
        self.parents.insert(identifier.to_string());
    }
}

// A dependency link from a parent to a child node.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub(crate) requirement: Requirement,
    pub(crate) weight: usize,
}

/// A package which cannot join the graph until its conditions are all
/// fulfilled by other nodes.
#[derive(Debug, Clone)]
pub struct StoredNode {
    requirement: Requirement,
    package: Arc<Package>,
    parent: Option<String>,
    weight: usize,
}

impl StoredNode {
    /// Return the stored node identifier
    pub fn identifier(&self) -> &str {
        self.package.identifier()
    }

    /// Return the embedded package
    pub fn package(&self) -> &Arc<Package> {
        &self.package
    }
}

// Pending graph update.
struct QueueItem {
    requirement: Requirement,
    package: Option<Arc<Package>>,
    parent: Option<String>,
    weight: usize,
    // Set for packages promoted from the conditioned list, so that their
    // conditions are not re-evaluated.
    promoted: bool,
}

/// Package dependency graph built from requirements.
///
/// The graph is cheaply clonable: packages are shared by reference, only
/// the node and link tables are copied.
#[derive(Debug, Clone)]
pub struct Graph<'a> {
    context: &'a ResolverContext<'a>,
    nodes: IndexMap<String, Node>,
    links: IndexMap<String, IndexMap<String, Link>>,
    errors: IndexMap<String, Vec<String>>,
    conditioned: Vec<StoredNode>,
    identifiers_per_definition: IndexMap<String, IndexSet<String>>,
    variants_per_definition: IndexMap<String, Vec<String>>,
    namespace_count: IndexMap<String, usize>,
}

impl<'a> Graph<'a> {
    /// Create an empty graph
    pub fn new(context: &'a ResolverContext<'a>) -> Self {
        Graph {
            context,
            nodes: IndexMap::new(),
            links: IndexMap::new(),
            errors: IndexMap::new(),
            conditioned: Vec::new(),
            identifiers_per_definition: IndexMap::new(),
            variants_per_definition: IndexMap::new(),
            namespace_count: IndexMap::new(),
        }
    }

    /// Return the resolver context the graph was created with
    pub fn context(&self) -> &'a ResolverContext<'a> {
        self.context
    }

    /// Return the node registered for *identifier*, if any
    pub fn node(&self, identifier: &str) -> Option<&Node> {
        self.nodes.get(identifier)
    }

    /// Indicate whether the node *identifier* is in the graph
    pub fn exists(&self, identifier: &str) -> bool {
        self.nodes.contains_key(identifier)
    }

    /// Return all nodes in the graph
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Return existing nodes belonging to a definition identifier
    pub fn nodes_for_definition(&self, definition_identifier: &str) -> Vec<&Node> {
        self.identifiers_per_definition
            .get(definition_identifier)
            .map(|identifiers| {
                identifiers
                    .iter()
                    .filter_map(|identifier| self.node(identifier))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return identifiers of nodes whose package matches *requirement*
    pub fn find(&self, requirement: &Requirement) -> Vec<String> {
        self.nodes
            .values()
            .filter(|node| node.package.satisfies(requirement))
            .map(|node| node.identifier().to_string())
            .collect()
    }

    /// Return all stored nodes with pending conditions
    pub fn conditioned_nodes(&self) -> &[StoredNode] {
        &self.conditioned
    }

    /// Return identifiers of nodes conflicting over one definition.
    ///
    /// A conflict appears when several nodes exist for a single definition
    /// identifier.
    pub fn conflicting(&self) -> IndexSet<String> {
        let mut conflicting = IndexSet::new();

        for identifiers in self.identifiers_per_definition.values() {
            let existing: Vec<&String> = identifiers
                .iter()
                .filter(|identifier| self.exists(identifier))
                .collect();

            if existing.len() > 1 {
                conflicting.extend(existing.into_iter().cloned());
            }
        }

        conflicting
    }

    /// Return conflicting variant groups.
    ///
    /// Groups are ordered by decreasing number of occurrences of their
    /// definition among the graph requirements; identifiers within a group
    /// follow the variant declaration order.
    pub fn variant_groups(&self) -> Vec<Vec<String>> {
        let mut groups: Vec<(usize, Vec<String>)> = Vec::new();

        for identifiers in self.variants_per_definition.values() {
            let mut unique: Vec<String> = Vec::new();
            for identifier in identifiers {
                if self.exists(identifier) && !unique.contains(identifier) {
                    unique.push(identifier.clone());
                }
            }

            let variants: IndexSet<&str> = unique
                .iter()
                .filter_map(|identifier| self.node(identifier))
                .filter_map(|node| node.package().variant())
                .collect();

            if variants.len() > 1 {
                let occurrences = identifiers
                    .iter()
                    .filter(|identifier| self.exists(identifier))
                    .count();
                groups.push((occurrences, unique));
            }
        }

        groups.sort_by(|(left, _), (right, _)| right.cmp(left));
        groups.into_iter().map(|(_, group)| group).collect()
    }

    /// Return recorded errors per existing node identifier
    pub fn errors(&self) -> IndexMap<String, Vec<String>> {
        self.errors
            .iter()
            .filter(|(identifier, _)| *identifier == ROOT || self.exists(identifier))
            .map(|(identifier, messages)| (identifier.clone(), messages.clone()))
            .collect()
    }

    /// Return existing child identifiers of node *identifier*
    pub fn outgoing(&self, identifier: &str) -> Vec<String> {
        self.links
            .get(identifier)
            .map(|children| {
                children
                    .keys()
                    .filter(|child| self.exists(child))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return the weight of the link between *parent* and *identifier*
    pub fn link_weight(&self, identifier: &str, parent: &str) -> Option<usize> {
        self.links
            .get(parent)
            .and_then(|children| children.get(identifier))
            .map(|link| link.weight)
    }

    /// Return the requirement of the link between *parent* and *identifier*
    pub fn link_requirement(&self, identifier: &str, parent: &str) -> Option<&Requirement> {
        self.links
            .get(parent)
            .and_then(|children| children.get(identifier))
            .map(|link| &link.requirement)
    }

    /// Return the namespace occurrence counter
    pub fn namespace_count(&self) -> &IndexMap<String, usize> {
        &self.namespace_count
    }

    /// Update the graph from *requirements*, attached to the root node.
    ///
    /// Packages are extracted for each requirement and nodes added
    /// accordingly; the process repeats breadth-first for the requirements
    /// of newly created packages.
    pub fn update_from_requirements(&mut self, requirements: &[Requirement]) {
        self.context.record(|| Action::GraphUpdate {
            requirements: requirements.iter().map(|r| r.to_string()).collect(),
        });

        // Count namespaces first so that each requirement can influence
        // package extraction whatever the requirement order is.
        self.count_namespaces(requirements);

        let connections = self.links.get(ROOT).map(IndexMap::len).unwrap_or(0);

        let mut queue: Vec<QueueItem> = requirements
            .iter()
            .enumerate()
            .map(|(index, requirement)| QueueItem {
                requirement: requirement.clone(),
                package: None,
                parent: Some(ROOT.to_string()),
                weight: connections + index + 1,
                promoted: false,
            })
            .collect();

        self.process_queue(&mut queue);
    }

    /// Update the graph from an already materialized *package*.
    ///
    /// When *detached* is set, the node is not linked to the root.
    pub fn update_from_package(
        &mut self,
        package: Arc<Package>,
        requirement: &Requirement,
        detached: bool,
    ) {
        self.context.record(|| Action::GraphUpdate {
            requirements: vec![requirement.to_string()],
        });

        let weight = match detached {
            true => 1,
            false => self.links.get(ROOT).map(IndexMap::len).unwrap_or(0) + 1,
        };

        let mut queue = vec![QueueItem {
            requirement: requirement.clone(),
            package: Some(package),
            parent: (!detached).then(|| ROOT.to_string()),
            weight,
            promoted: false,
        }];

        self.process_queue(&mut queue);
    }

    /// Promote stored nodes whose conditions are now fulfilled.
    ///
    /// Returns true when the graph gained at least one node.
    pub(crate) fn promote_fulfilled_conditions(&mut self) -> bool {
        let fulfilled = self.fulfilled_stored_nodes();
        if fulfilled.is_empty() {
            return false;
        }

        let mut queue: Vec<QueueItem> = fulfilled
            .into_iter()
            .map(|stored| QueueItem {
                requirement: stored.requirement.clone(),
                package: Some(stored.package.clone()),
                parent: stored.parent.clone(),
                weight: stored.weight,
                promoted: true,
            })
            .collect();

        self.process_queue(&mut queue);
        true
    }

    // Drain the update queue, then promote stored nodes whose conditions
    // are fulfilled, until nothing new joins the graph.
    fn process_queue(&mut self, queue: &mut Vec<QueueItem>) {
        loop {
            while !queue.is_empty() {
                let item = queue.remove(0);
                match item.package {
                    None => self.process_requirement(item, queue),
                    Some(_) => self.process_package(item, queue),
                }
            }

            let fulfilled = self.fulfilled_stored_nodes();
            if fulfilled.is_empty() {
                return;
            }

            for stored in fulfilled {
                queue.push(QueueItem {
                    requirement: stored.requirement.clone(),
                    package: Some(stored.package.clone()),
                    parent: stored.parent.clone(),
                    weight: stored.weight,
                    promoted: true,
                });
            }
        }
    }

    fn process_requirement(&mut self, item: QueueItem, queue: &mut Vec<QueueItem>) {
        log::debug!("Update from requirement: {}", item.requirement);

        let packages = match self
            .context
            .extract_packages(&item.requirement, &self.namespace_count)
        {
            Ok(packages) => packages,
            Err(error) => {
                let parent = item.parent.unwrap_or_else(|| ROOT.to_string());
                self.errors.entry(parent).or_default().push(error.to_string());
                return;
            }
        };

        for package in packages {
            self.process_package(
                QueueItem {
                    requirement: item.requirement.clone(),
                    package: Some(package),
                    parent: item.parent.clone(),
                    weight: item.weight,
                    promoted: false,
                },
                queue,
            );
        }
    }

    fn process_package(&mut self, item: QueueItem, queue: &mut Vec<QueueItem>) {
        let package = match item.package {
            Some(package) => package,
            None => return,
        };

        // Ensure that the link requirement carries the package namespace.
        let requirement = match (item.requirement.namespace(), package.namespace()) {
            (None, Some(namespace)) => {
                *self.namespace_count.entry(namespace.to_string()).or_insert(0) += 1;
                item.requirement.with_namespace(namespace)
            }
            _ => item.requirement.clone(),
        };

        let identifier = package.identifier().to_string();

        if !self.exists(&identifier) {
            // Packages with unfulfilled conditions are kept aside until
            // every condition matches a node in the graph.
            if !item.promoted
                && !package.conditions().is_empty()
                && !self.conditions_fulfilled(&package)
            {
                if !self
                    .conditioned
                    .iter()
                    .any(|stored| stored.identifier() == identifier)
                {
                    self.conditioned.push(StoredNode {
                        requirement,
                        package,
                        parent: item.parent,
                        weight: item.weight,
                    });
                }
                return;
            }

            self.create_node(package.clone());

            for (index, dependency) in package.requirements().iter().enumerate() {
                queue.push(QueueItem {
                    requirement: dependency.clone(),
                    package: None,
                    parent: Some(identifier.clone()),
                    weight: index + 1,
                    promoted: false,
                });
            }
        } else {
            self.record_variant(&identifier);
        }

        if let Some(parent) = item.parent {
            if let Some(node) = self.nodes.get_mut(&identifier) {
                node.add_parent(&parent);
            }
            self.create_link(&identifier, &parent, requirement, item.weight);
        }
    }

    // Stored nodes whose conditions all match a node in the graph.
    fn fulfilled_stored_nodes(&self) -> Vec<StoredNode> {
        self.conditioned
            .iter()
            .filter(|stored| !self.exists(stored.identifier()))
            .filter(|stored| self.conditions_fulfilled(&stored.package))
            .cloned()
            .collect()
    }

    fn conditions_fulfilled(&self, package: &Package) -> bool {
        package
            .conditions()
            .iter()
            .all(|condition| !self.find(condition).is_empty())
    }

    fn create_node(&mut self, package: Arc<Package>) {
        log::debug!("Adding package: {}", package.identifier());

        let identifier = package.identifier().to_string();
        let definition_identifier = package.definition_identifier().to_string();

        self.nodes.insert(identifier.clone(), Node::new(package));

        self.identifiers_per_definition
            .entry(definition_identifier)
            .or_default()
            .insert(identifier.clone());

        self.record_variant(&identifier);

        self.context.record(|| Action::NodeCreation {
            identifier: identifier.clone(),
        });
    }

    // Record variant node identifiers per definition; occurrences determine
    // the variant group priority, so duplicates are kept.
    fn record_variant(&mut self, identifier: &str) {
        let node = match self.nodes.get(identifier) {
            Some(node) => node,
            None => return,
        };

        if node.package().variant().is_none() {
            return;
        }

        let definition_identifier = node.definition_identifier().to_string();
        self.variants_per_definition
            .entry(definition_identifier)
            .or_default()
            .push(identifier.to_string());
    }

    fn create_link(
        &mut self,
        identifier: &str,
        parent: &str,
        requirement: Requirement,
        weight: usize,
    ) {
        let children = self.links.entry(parent.to_string()).or_default();

        // Keep the weight of an existing link, so that the first requirement
        // for a definition keeps its priority.
        let weight = children
            .get(identifier)
            .map(|link| link.weight)
            .unwrap_or(weight);

        log::debug!(
            "Add dependency link from '{}' to '{}' [weight: {}]",
            parent,
            identifier,
            weight
        );

        children.insert(
            identifier.to_string(),
            Link {
                requirement,
                weight,
            },
        );

        self.context.record(|| Action::LinkCreation {
            parent: parent.to_string(),
            child: identifier.to_string(),
            weight,
        });
    }

    fn count_namespaces(&mut self, requirements: &[Requirement]) {
        for requirement in requirements {
            match requirement.namespace() {
                Some(namespace) => {
                    *self.namespace_count.entry(namespace.to_string()).or_insert(0) += 1;
                }
                None => {
                    if let Some(namespaces) =
                        self.context.index().namespaces_for(requirement.name())
                    {
                        for namespace in namespaces {
                            *self.namespace_count.entry(namespace.clone()).or_insert(0) += 1;
                        }
                    }
                }
            }
        }
    }

    /// Remove a node from the graph.
    ///
    /// Links are kept so that parents can be relinked afterwards.
    pub fn remove_node(&mut self, identifier: &str) {
        if self.nodes.shift_remove(identifier).is_some() {
            self.context.record(|| Action::NodeRemoval {
                identifier: identifier.to_string(),
            });
        }
    }

    /// Relink parents of a removed node to nodes matching their requirement.
    ///
    /// The weight of the previous link is preserved; *requirement* is used
    /// for each new link when given, otherwise the previous link requirement
    /// is reused. A parent which cannot be relinked records an error.
    pub fn relink_parents(&mut self, removed: &Node, requirement: Option<&Requirement>) {
        let substitutes: Option<Vec<String>> = requirement.map(|req| self.find(req));

        for parent in removed.parents() {
            if parent != ROOT && !self.exists(parent) {
                continue;
            }

            let weight = self
                .link_weight(removed.identifier(), parent)
                .unwrap_or(1);
            let link_requirement = match requirement {
                Some(req) => req.clone(),
                None => match self.link_requirement(removed.identifier(), parent) {
                    Some(req) => req.clone(),
                    None => continue,
                },
            };

            let targets = match &substitutes {
                Some(identifiers) => identifiers.clone(),
                None => self.find(&link_requirement),
            };

            if targets.is_empty() {
                self.errors.entry(parent.clone()).or_default().push(format!(
                    "Requirement '{}' can not be satisfied once '{}' is removed from the graph",
                    link_requirement,
                    removed.identifier(),
                ));
                continue;
            }

            for target in targets {
                if let Some(node) = self.nodes.get_mut(&target) {
                    node.add_parent(parent);
                }
                self.create_link(&target, parent, link_requirement.clone(), weight);
            }
        }
    }

    /// Replace conflicting nodes with nodes at a downgraded version.
    ///
    /// For each node identifier, the combined incoming requirement is
    /// restricted to exclude the current version and the best remaining
    /// version is fetched. Returns true when at least one node could be
    /// replaced.
    pub fn downgrade_versions(&mut self, identifiers: &[String]) -> Result<bool> {
        let mut operations = Vec::new();
        let mut replacements = Vec::new();

        for identifier in identifiers {
            log::debug!(
                "Attempt to fetch another version for conflicting package '{}'",
                identifier
            );

            let node = match self.node(identifier) {
                Some(node) => node.clone(),
                None => continue,
            };

            let version = match node.package().version() {
                Some(version) => version.clone(),
                None => {
                    log::debug!(
                        "Impossible to fetch another version for package '{}'",
                        identifier
                    );
                    continue;
                }
            };

            let combined = match combined_requirements(self, &[node.clone()]) {
                Ok(Some(requirement)) => requirement,
                _ => continue,
            };

            // Keep the variant selector when present so that the downgraded
            // node stays within the same variant.
            let mut restricted = combined.excluding_version(&version)?;
            if let (Some(variant), None) = (node.package().variant(), restricted.variant()) {
                restricted = match Requirement::parse(&format!(
                    "{}[{}] {}",
                    restricted.qualified_name(),
                    variant,
                    restricted.specifiers()
                )) {
                    Ok(requirement) => requirement,
                    Err(_) => restricted,
                };
            }

            let packages = match self
                .context
                .extract_packages(&restricted, &self.namespace_count)
            {
                Ok(packages) => packages,
                Err(_) => {
                    log::debug!(
                        "Impossible to fetch another version for package '{}' \
                         with request '{}'",
                        identifier,
                        restricted
                    );
                    continue;
                }
            };

            for package in &packages {
                replacements.push((identifier.clone(), package.identifier().to_string()));
            }
            operations.push((node, packages, restricted));
        }

        if operations.is_empty() {
            return Ok(false);
        }

        // Add the downgraded versions first, then remove the conflicting
        // nodes and relink their parents.
        for (_, packages, requirement) in &operations {
            for package in packages {
                self.update_from_package(package.clone(), requirement, true);
            }
        }

        for (node, _, _) in &operations {
            self.remove_node(node.identifier());
            self.relink_parents(node, None);
        }

        self.context.record(|| Action::NodesDowngrade {
            mapping: replacements.clone(),
        });

        Ok(true)
    }
}

/// Return the combined requirement from all incoming links of *nodes*.
///
/// Returns `None` when none of the nodes has an existing parent link.
pub fn combined_requirements(
    graph: &Graph<'_>,
    nodes: &[Node],
) -> Result<Option<Requirement>> {
    let mut combined: Option<Requirement> = None;

    for node in nodes {
        for parent in node.parents() {
            if parent != ROOT && !graph.exists(parent) {
                continue;
            }

            let requirement = match graph.link_requirement(node.identifier(), parent) {
                Some(requirement) => requirement.clone(),
                None => continue,
            };

            combined = Some(match combined {
                None => requirement,
                Some(previous) => previous.combine(&requirement).map_err(WizError::from)?,
            });
        }
    }

    Ok(combined)
}
