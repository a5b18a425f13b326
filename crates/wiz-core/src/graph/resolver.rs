//! Resolver driver orchestrating combinations, conflicts and downgrades

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::combination::VariantCombinations;
use super::Graph;
use crate::error::{ResolutionError, Result, WizError};
use crate::history::{Action, History};
use crate::package::{self, Package, PackageCache};
use crate::registry::Index;
use wiz_version::Requirement;

/// Bounds and toggles for one resolution
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Bound on version downgrade rounds
    pub max_attempts: usize,

    /// Bound on explored variant combinations
    pub max_combinations: usize,

    /// Whether auto-use packages are prepended to the requests
    pub include_implicit: bool,

    /// Namespaces used as hints when identifying packages
    pub namespace_hints: IndexSet<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            max_attempts: 15,
            max_combinations: 10_000,
            include_implicit: true,
            namespace_hints: IndexSet::new(),
        }
    }
}

/// Shared state threaded through one resolution call.
///
/// The context owns the package cache and the optional history; the
/// definition index stays read-only and shareable.
#[derive(Debug)]
pub struct ResolverContext<'a> {
    index: &'a Index,
    options: ResolveOptions,
    cache: PackageCache,
    history: RefCell<History>,
    divided_variants: RefCell<IndexSet<String>>,
}

impl<'a> ResolverContext<'a> {
    /// Create a context over *index* with *options*
    pub fn new(index: &'a Index, options: ResolveOptions) -> Self {
        ResolverContext {
            index,
            options,
            cache: PackageCache::default(),
            history: RefCell::new(History::default()),
            divided_variants: RefCell::new(IndexSet::new()),
        }
    }

    /// Enable action recording
    pub fn with_history(self) -> Self {
        *self.history.borrow_mut() = History::enabled();
        self
    }

    /// Return the definition index
    pub fn index(&self) -> &'a Index {
        self.index
    }

    /// Return the resolution options
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Return a copy of the recorded actions
    pub fn history(&self) -> Vec<Action> {
        self.history.borrow().actions().to_vec()
    }

    pub(crate) fn record<F: FnOnce() -> Action>(&self, action: F) {
        let mut history = self.history.borrow_mut();
        if history.is_enabled() {
            history.record(action());
        }
    }

    pub(crate) fn extract_packages(
        &self,
        requirement: &Requirement,
        namespace_counter: &IndexMap<String, usize>,
    ) -> Result<Vec<Arc<Package>>> {
        package::extract(
            requirement,
            self.index,
            &self.options.namespace_hints,
            namespace_counter,
            &self.cache,
        )
    }

    pub(crate) fn is_divided(&self, identifier: &str) -> bool {
        self.divided_variants.borrow().contains(identifier)
    }

    pub(crate) fn mark_divided(&self, identifiers: impl IntoIterator<Item = String>) {
        self.divided_variants.borrow_mut().extend(identifiers);
    }
}

/// Graph resolver.
///
/// Computes an ordered list of packages from an initial list of
/// requirements. Conflicting variant groups divide the graph into
/// combinations which are explored lazily; exhausted combinations trigger
/// version downgrades until the attempt and combination bounds run out.
pub struct Resolver<'a> {
    context: &'a ResolverContext<'a>,
    iterators: VecDeque<VariantCombinations<'a>>,
    conflicting_combinations: VecDeque<(Graph<'a>, Vec<String>)>,
    combination_count: usize,
    attempt_count: usize,
}

impl<'a> Resolver<'a> {
    /// Create a resolver bound to *context*
    pub fn new(context: &'a ResolverContext<'a>) -> Self {
        Resolver {
            context,
            iterators: VecDeque::new(),
            conflicting_combinations: VecDeque::new(),
            combination_count: 0,
            attempt_count: 0,
        }
    }

    /// Resolve *requirements* into an ordered package list
    pub fn compute_packages(
        &mut self,
        requirements: &[Requirement],
    ) -> Result<Vec<Arc<Package>>> {
        self.context.record(|| Action::GraphCreation {
            requirements: requirements.iter().map(|r| r.to_string()).collect(),
        });

        let mut graph = Graph::new(self.context);
        graph.update_from_requirements(requirements);

        self.reset_combinations(graph);

        let mut latest_error: Option<ResolutionError> = None;

        loop {
            let combination = match self.fetch_next_combination() {
                Some(combination) => combination,
                None => break,
            };

            if self.combination_count >= self.context.options.max_combinations {
                break;
            }
            self.combination_count += 1;

            let mut combination = combination;
            let outcome = combination
                .resolve_conflicts()
                .and_then(|_| combination.validate());

            match outcome {
                Ok(()) => return Ok(combination.extract_packages()),
                Err(error) => {
                    self.context.record(|| Action::ResolutionFailure {
                        error: error.to_string(),
                    });

                    // Record conflicting parents so that new combinations
                    // can be computed with downgraded versions.
                    if let ResolutionError::Conflicts(records) = &error {
                        for record in records {
                            self.conflicting_combinations
                                .push_back((combination.graph().clone(), record.parents.clone()));
                        }
                    }

                    // A division is required when new variants appeared
                    // during conflict resolution.
                    if matches!(error, ResolutionError::Variants) {
                        self.extract_combinations(combination.graph().clone());
                    }

                    log::debug!("Failed to resolve graph: {}", error);
                    latest_error = Some(error);
                }
            }
        }

        let source = latest_error.unwrap_or_else(|| ResolutionError::Conflicts(Vec::new()));
        Err(WizError::GraphResolution(ResolutionError::Exhausted {
            combinations: self.combination_count,
            source: Box::new(source),
        }))
    }

    fn reset_combinations(&mut self, graph: Graph<'a>) {
        log::debug!("Initiate combination iterator from graph");
        self.iterators.clear();
        self.extract_combinations(graph);
    }

    fn extract_combinations(&mut self, graph: Graph<'a>) {
        let groups = graph.variant_groups();

        if !groups.is_empty() {
            log::debug!("The following variant groups are conflicting: {:?}", groups);

            self.context
                .mark_divided(groups.iter().flatten().cloned());

            self.context.record(|| Action::VariantGroupsIdentification {
                groups: groups.clone(),
            });
        }

        self.iterators.push_front(VariantCombinations::new(graph));
    }

    fn fetch_next_combination(&mut self) -> Option<super::combination::GraphCombination<'a>> {
        loop {
            match self.iterators.front_mut() {
                Some(iterator) => match iterator.next() {
                    Some(combination) => return Some(combination),
                    None => {
                        self.iterators.pop_front();
                    }
                },
                None => {
                    // All combinations are exhausted; attempt to compute new
                    // ones by downgrading conflicting versions.
                    if !self.fetch_new_combinations() {
                        log::debug!(
                            "Impossible to find new graph combinations by downgrading \
                             conflicting versions"
                        );
                        return None;
                    }
                }
            }
        }
    }

    fn fetch_new_combinations(&mut self) -> bool {
        while let Some((mut graph, identifiers)) = self.conflicting_combinations.pop_front() {
            if self.attempt_count >= self.context.options.max_attempts {
                return false;
            }

            match graph.downgrade_versions(&identifiers) {
                Ok(true) => {
                    self.attempt_count += 1;
                    self.reset_combinations(graph);
                    return true;
                }
                _ => continue,
            }
        }

        false
    }
}
