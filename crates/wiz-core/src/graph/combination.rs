//! Graph combinations over conflicting variant groups

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::distance::{compute_distance_mapping, DistanceMapping};
use super::{combined_requirements, Graph, Node, ROOT};
use crate::error::{Conflict, NodeError, ResolutionError, WizError};
use crate::history::Action;
use crate::package::{check_conflicting_requirements, Package};
use wiz_version::Requirement;

/// A candidate graph with one variant selected per conflicting group.
///
/// The combination owns a working graph derived from the initial one and
/// caches its distance mapping; the cache is invalidated whenever a node is
/// added, removed or replaced.
pub struct GraphCombination<'a> {
    graph: Graph<'a>,
    distance_mapping: Option<DistanceMapping>,
    conflict_errors: Vec<Conflict>,
}

impl<'a> GraphCombination<'a> {
    /// Wrap *graph* without dividing it
    pub fn from_graph(graph: Graph<'a>) -> Self {
        GraphCombination {
            graph,
            distance_mapping: None,
            conflict_errors: Vec::new(),
        }
    }

    /// Wrap *graph* after removing rejected variant nodes and pruning
    pub fn from_graph_with_removal(graph: Graph<'a>, identifiers: &IndexSet<String>) -> Self {
        graph.context().record(|| Action::CombinationExtraction {
            removed: identifiers.iter().cloned().collect(),
        });

        let mut combination = GraphCombination::from_graph(graph);
        combination.remove_nodes(identifiers);
        combination.prune_graph();
        combination
    }

    /// Return the working graph
    pub fn graph(&self) -> &Graph<'a> {
        &self.graph
    }

    fn remove_nodes(&mut self, identifiers: &IndexSet<String>) {
        let mut removed = Vec::new();

        for identifier in identifiers {
            if let Some(node) = self.graph.node(identifier).cloned() {
                self.graph.remove_node(identifier);
                removed.push(node);
            }
        }

        for node in &removed {
            self.graph.relink_parents(node, None);
        }

        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.distance_mapping = None;
    }

    fn fetch_distance_mapping(&mut self) -> &DistanceMapping {
        if self.distance_mapping.is_none() {
            self.distance_mapping = Some(compute_distance_mapping(&self.graph));
        }

        self.distance_mapping
            .as_ref()
            .unwrap_or_else(|| unreachable!("distance mapping computed above"))
    }

    /// Attempt to resolve all version conflicts in the working graph.
    ///
    /// Conflicting nodes are processed in ascending distance order: the
    /// incoming requirements of each conflicting group are combined and the
    /// graph is updated to the best version satisfying the combination.
    /// Unsatisfiable combinations are recorded and surfaced by
    /// [`GraphCombination::validate`].
    pub fn resolve_conflicts(&mut self) -> Result<(), ResolutionError> {
        loop {
            let conflicts = self.graph.conflicting();
            if conflicts.is_empty() {
                log::debug!("No conflicts in the graph.");
            } else {
                self.graph.context().record(|| Action::ConflictsIdentification {
                    identifiers: conflicts.iter().cloned().collect(),
                });

                self.resolve_conflict_queue(conflicts)?;
            }

            // Conditions may change once conflicting versions settle; add
            // newly fulfilled packages and resolve again.
            self.prune_graph();
            if !self.promote_conditioned() {
                return Ok(());
            }
        }
    }

    fn resolve_conflict_queue(
        &mut self,
        conflicts: IndexSet<String>,
    ) -> Result<(), ResolutionError> {
        let mut circular: IndexSet<String> = IndexSet::new();
        let mut failed_definitions: IndexSet<String> = IndexSet::new();
        let mut queue = self.conflict_queue(&conflicts, &circular);

        while let Some(identifier) = queue.pop_front() {
            let node = match self.graph.node(&identifier) {
                Some(node) => node.clone(),
                None => continue,
            };

            let siblings: Vec<Node> = self
                .graph
                .nodes_for_definition(node.definition_identifier())
                .into_iter()
                .filter(|sibling| sibling.identifier() != node.identifier())
                .cloned()
                .collect();

            if siblings.is_empty() {
                continue;
            }

            if failed_definitions.contains(node.definition_identifier()) {
                continue;
            }

            let mut group = vec![node.clone()];
            group.extend(siblings.iter().cloned());

            let combined = match combined_requirements(&self.graph, &group) {
                Ok(Some(requirement)) => requirement,
                _ => continue,
            };

            let packages = self
                .graph
                .context()
                .extract_packages(&combined, self.graph.namespace_count());

            match packages {
                Ok(packages) => {
                    if packages
                        .iter()
                        .any(|package| package.identifier() == node.identifier())
                    {
                        continue;
                    }

                    log::debug!("Remove '{}'", node.identifier());
                    self.graph.remove_node(node.identifier());

                    let updated = self.add_packages_to_graph(&packages, &combined, &siblings);

                    // Relink before a possible division so that newly added
                    // nodes do not remain parent-less.
                    self.graph.relink_parents(&node, Some(&combined));
                    self.invalidate();

                    if updated && !self.graph.variant_groups().is_empty() {
                        return Err(ResolutionError::Variants);
                    }

                    self.prune_graph();

                    let remaining: IndexSet<String> =
                        queue.drain(..).chain(self.graph.conflicting()).collect();
                    circular.retain(|identifier| self.graph.exists(identifier));
                    queue = self.conflict_queue(&remaining, &circular);
                }
                Err(WizError::RequestNotFound(_)) => {
                    let records = extract_conflicting_requirements(&self.graph, &group, &combined);

                    // Defer the conflict when parents are conflicting
                    // themselves, so they get a chance to settle first.
                    let parents: IndexSet<&String> =
                        records.iter().flat_map(|record| &record.parents).collect();
                    if parents.iter().any(|parent| queue.contains(*parent))
                        && !circular.contains(&identifier)
                    {
                        circular.insert(identifier.clone());
                        queue.push_back(identifier);
                        continue;
                    }

                    failed_definitions.insert(node.definition_identifier().to_string());
                    self.conflict_errors.extend(records);
                }
                Err(error) => {
                    return Err(ResolutionError::InvalidNodes(vec![NodeError {
                        parent: node.identifier().to_string(),
                        message: error.to_string(),
                    }]));
                }
            }
        }

        Ok(())
    }

    // Order conflicting identifiers by ascending distance, then definition
    // identifier, then version descending. Unreachable nodes are dropped;
    // circular conflicts go to the back of the queue.
    fn conflict_queue(
        &mut self,
        conflicts: &IndexSet<String>,
        circular: &IndexSet<String>,
    ) -> VecDeque<String> {
        let mapping = self.fetch_distance_mapping().clone();

        let sort_key = |identifier: &String| {
            let node = self.graph.node(identifier);
            (
                mapping.get(identifier).map(|entry| entry.distance),
                node.map(|node| node.definition_identifier().to_string()),
                std::cmp::Reverse(
                    node.and_then(|node| node.package().version().cloned()),
                ),
            )
        };

        let mut ordered: Vec<String> = conflicts
            .iter()
            .filter(|identifier| mapping.contains_key(*identifier))
            .filter(|identifier| !circular.contains(*identifier))
            .cloned()
            .collect();
        ordered.sort_by_key(|identifier| sort_key(identifier));

        let mut deferred: Vec<String> = circular
            .iter()
            .filter(|identifier| mapping.contains_key(*identifier))
            .cloned()
            .collect();
        deferred.sort_by_key(|identifier| sort_key(identifier));

        ordered.extend(deferred);
        ordered.into()
    }

    // Add extracted packages which are not already conflicting and did not
    // already lead to a graph division.
    fn add_packages_to_graph(
        &mut self,
        packages: &[Arc<Package>],
        requirement: &Requirement,
        conflicting: &[Node],
    ) -> bool {
        let context = self.graph.context();

        let new_packages: Vec<&Arc<Package>> = packages
            .iter()
            .filter(|package| {
                !conflicting
                    .iter()
                    .any(|node| node.identifier() == package.identifier())
            })
            .filter(|package| !context.is_divided(package.identifier()))
            .collect();

        if new_packages.is_empty() {
            return false;
        }

        log::debug!(
            "Add to graph: {}",
            packages
                .iter()
                .map(|package| package.identifier())
                .collect::<Vec<_>>()
                .join(", ")
        );

        for package in packages {
            self.graph
                .update_from_package(package.clone(), requirement, true);
        }
        self.invalidate();

        true
    }

    /// Remove unreachable nodes and nodes whose conditions are no longer
    /// fulfilled, repeating until the graph is stable.
    pub fn prune_graph(&mut self) {
        loop {
            if !self.trim_unreachable_nodes() {
                return;
            }

            if !self.trim_unfulfilled_conditions() {
                return;
            }
        }
    }

    fn trim_unreachable_nodes(&mut self) -> bool {
        self.invalidate();
        let mapping = self.fetch_distance_mapping().clone();

        let unreachable: Vec<String> = self
            .graph
            .nodes()
            .map(|node| node.identifier().to_string())
            .filter(|identifier| !mapping.contains_key(identifier))
            .collect();

        for identifier in &unreachable {
            log::debug!("Remove '{}'", identifier);
            self.graph.remove_node(identifier);
        }

        if !unreachable.is_empty() {
            self.invalidate();
        }
        !unreachable.is_empty()
    }

    fn trim_unfulfilled_conditions(&mut self) -> bool {
        let mut removed = false;
        let mut needs_update = true;

        while needs_update {
            needs_update = false;
            let mapping = self.fetch_distance_mapping().clone();

            for stored in self.graph.conditioned_nodes().to_vec() {
                if !self.graph.exists(stored.identifier()) {
                    continue;
                }

                let unfulfilled = stored.package().conditions().iter().any(|condition| {
                    let identifiers = self.graph.find(condition);
                    identifiers.is_empty()
                        || identifiers
                            .iter()
                            .all(|identifier| !mapping.contains_key(identifier))
                });

                if unfulfilled {
                    log::debug!(
                        "Remove '{}' as conditions are no longer fulfilled",
                        stored.identifier()
                    );
                    self.graph.remove_node(stored.identifier());
                    self.invalidate();
                    removed = true;
                    needs_update = true;
                }
            }
        }

        removed
    }

    // Promote stored nodes whose conditions became fulfilled; returns true
    // when the graph gained at least one node.
    fn promote_conditioned(&mut self) -> bool {
        if self.graph.promote_fulfilled_conditions() {
            self.invalidate();
            return true;
        }
        false
    }

    /// Fail the combination when errors were recorded during resolution
    pub fn validate(&self) -> Result<(), ResolutionError> {
        if !self.conflict_errors.is_empty() {
            return Err(ResolutionError::Conflicts(self.conflict_errors.clone()));
        }

        let errors = self.graph.errors();
        if !errors.is_empty() {
            log::debug!(
                "Errors: {}",
                errors.keys().cloned().collect::<Vec<_>>().join(", ")
            );

            return Err(ResolutionError::InvalidNodes(
                errors
                    .into_iter()
                    .flat_map(|(parent, messages)| {
                        messages.into_iter().map(move |message| NodeError {
                            parent: parent.clone(),
                            message,
                        })
                    })
                    .collect(),
            ));
        }

        log::debug!("No errors in the graph.");
        Ok(())
    }

    /// Return packages ordered by ascending distance from the root.
    ///
    /// Equal distances order by the lexicographic parent identifier path,
    /// then by node insertion order.
    pub fn extract_packages(&mut self) -> Vec<Arc<Package>> {
        let mapping = self.fetch_distance_mapping().clone();

        let mut nodes: Vec<NodeEntry> = self
            .graph
            .nodes()
            .enumerate()
            .filter_map(|(index, node)| {
                mapping.get(node.identifier()).map(|entry| NodeEntry {
                    package: node.package().clone(),
                    distance: entry.distance,
                    path: entry.path.clone(),
                    index,
                })
            })
            .collect();

        nodes.sort_by(|left, right| {
            left.distance
                .cmp(&right.distance)
                .then_with(|| left.path.cmp(&right.path))
                .then_with(|| left.index.cmp(&right.index))
        });

        let packages: Vec<Arc<Package>> =
            nodes.into_iter().map(|entry| entry.package).collect();

        log::debug!(
            "Sorted packages: {}",
            packages
                .iter()
                .map(|package| package.identifier())
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.graph.context().record(|| Action::PackagesExtraction {
            identifiers: packages
                .iter()
                .map(|package| package.identifier().to_string())
                .collect(),
        });

        packages
    }
}

struct NodeEntry {
    package: Arc<Package>,
    distance: usize,
    path: Vec<String>,
    index: usize,
}

/// Return conflicting requirement records for *nodes*.
///
/// A requirement is conflicting when it does not overlap with at least one
/// other requirement from existing parents of *nodes*. Records are sorted
/// by decreasing number of conflicting counterparts.
pub fn extract_conflicting_requirements(
    graph: &Graph<'_>,
    nodes: &[Node],
    combined: &Requirement,
) -> Vec<Conflict> {
    // Identify parent identifiers per requirement.
    let mut per_requirement: IndexMap<String, (Requirement, IndexSet<String>)> = IndexMap::new();

    for node in nodes {
        for parent in node.parents() {
            if parent != ROOT && !graph.exists(parent) {
                continue;
            }

            if let Some(requirement) = graph.link_requirement(node.identifier(), parent) {
                per_requirement
                    .entry(requirement.to_string())
                    .or_insert_with(|| (requirement.clone(), IndexSet::new()))
                    .1
                    .insert(parent.clone());
            }
        }
    }

    // Identify pairwise non-overlapping requirements.
    let keys: Vec<String> = per_requirement.keys().cloned().collect();
    let mut conflicting: IndexMap<String, IndexSet<String>> = IndexMap::new();

    for (position, left) in keys.iter().enumerate() {
        for right in &keys[position + 1..] {
            let requirement_left = &per_requirement[left].0;
            let requirement_right = &per_requirement[right].0;

            if !requirement_left.is_overlapping(requirement_right) {
                conflicting.entry(left.clone()).or_default().insert(right.clone());
                conflicting.entry(right.clone()).or_default().insert(left.clone());
            }
        }
    }

    let mut records: Vec<Conflict> = conflicting
        .iter()
        .map(|(key, counterparts)| {
            let (requirement, parents) = &per_requirement[key];
            Conflict {
                requirement: requirement.clone(),
                parents: parents.iter().cloned().collect(),
                conflicts_with: counterparts
                    .iter()
                    .map(|counterpart| per_requirement[counterpart].0.clone())
                    .collect(),
                combined: combined.clone(),
            }
        })
        .collect();

    records.sort_by(|left, right| {
        right
            .conflicts_with
            .len()
            .cmp(&left.conflicts_with.len())
            .then_with(|| right.requirement.to_string().cmp(&left.requirement.to_string()))
    });

    records
}

// One selectable variant within a group: every node carrying that variant
// identifier, ordered as within the group.
#[derive(Debug, Clone)]
struct Choice {
    identifiers: Vec<String>,
}

/// Lazy iterator over variant permutations.
///
/// The first group iterates slowest and the last one fastest. Permutations
/// whose chosen nodes carry pairwise incompatible requirements are skipped
/// without constructing a working graph. Without variant groups, a single
/// combination wrapping the graph is emitted.
pub struct VariantCombinations<'a> {
    graph: Graph<'a>,
    groups: Vec<Vec<Choice>>,
    all_identifiers: IndexSet<String>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl<'a> VariantCombinations<'a> {
    /// Create an iterator over the variant groups of *graph*
    pub fn new(graph: Graph<'a>) -> Self {
        let variant_groups = graph.variant_groups();

        let mut all_identifiers = IndexSet::new();
        let mut groups = Vec::new();

        for group in &variant_groups {
            // Group node identifiers per variant identifier, keeping the
            // group order (e.g. [A[V2]==1, A[V1]==1, A[V1]==2] becomes
            // [[A[V2]==1], [A[V1]==1, A[V1]==2]]).
            let mut choices: IndexMap<String, Choice> = IndexMap::new();

            for identifier in group {
                all_identifiers.insert(identifier.clone());

                let variant = graph
                    .node(identifier)
                    .and_then(|node| node.package().variant())
                    .unwrap_or_default()
                    .to_string();

                choices
                    .entry(variant)
                    .or_insert_with(|| Choice {
                        identifiers: Vec::new(),
                    })
                    .identifiers
                    .push(identifier.clone());
            }

            groups.push(choices.into_values().collect());
        }

        VariantCombinations {
            graph,
            groups,
            all_identifiers,
            indices: Vec::new(),
            exhausted: false,
        }
    }

    fn advance(&mut self) -> bool {
        if self.exhausted {
            return false;
        }

        if self.indices.is_empty() {
            self.indices = vec![0; self.groups.len()];
            return true;
        }

        // Odometer increment: the last group iterates fastest.
        let mut position = self.groups.len();
        loop {
            if position == 0 {
                self.exhausted = true;
                return false;
            }
            position -= 1;

            self.indices[position] += 1;
            if self.indices[position] < self.groups[position].len() {
                return true;
            }
            self.indices[position] = 0;
        }
    }

    fn current_selection(&self) -> Vec<&Choice> {
        self.groups
            .iter()
            .zip(&self.indices)
            .map(|(choices, index)| &choices[*index])
            .collect()
    }

    // Pre-check pairwise compatibility of the chosen nodes across groups.
    fn is_compatible(&self, selection: &[&Choice]) -> bool {
        for (position, left) in selection.iter().enumerate() {
            for right in &selection[position + 1..] {
                for left_identifier in &left.identifiers {
                    for right_identifier in &right.identifiers {
                        let (left_node, right_node) = match (
                            self.graph.node(left_identifier),
                            self.graph.node(right_identifier),
                        ) {
                            (Some(left_node), Some(right_node)) => (left_node, right_node),
                            _ => continue,
                        };

                        let conflicts = check_conflicting_requirements(
                            left_node.package(),
                            right_node.package(),
                        );
                        if !conflicts.is_empty() {
                            log::debug!(
                                "Skip combination with '{}' and '{}': {}",
                                left_identifier,
                                right_identifier,
                                conflicts
                                    .iter()
                                    .map(|(a, b)| format!("'{}' / '{}'", a, b))
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            );
                            return false;
                        }
                    }
                }
            }
        }

        true
    }
}

impl<'a> Iterator for VariantCombinations<'a> {
    type Item = GraphCombination<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.groups.is_empty() {
            if self.exhausted {
                return None;
            }
            self.exhausted = true;
            return Some(GraphCombination::from_graph(self.graph.clone()));
        }

        loop {
            if !self.advance() {
                return None;
            }

            let selection = self.current_selection();

            let kept: IndexSet<String> = selection
                .iter()
                .flat_map(|choice| choice.identifiers.iter().cloned())
                .collect();

            if !self.is_compatible(&selection) {
                continue;
            }

            let removal: IndexSet<String> = self
                .all_identifiers
                .iter()
                .filter(|identifier| !kept.contains(*identifier))
                .cloned()
                .collect();

            return Some(GraphCombination::from_graph_with_removal(
                self.graph.clone(),
                &removal,
            ));
        }
    }
}
