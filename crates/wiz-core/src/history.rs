//! Optional log of resolver actions
//!
//! The history makes the resolver orderings observable: graph updates,
//! conflict identification, combination extraction, downgrades and the
//! final package extraction are appended in the order they happen.

/// One recorded resolver action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    GraphCreation { requirements: Vec<String> },
    GraphUpdate { requirements: Vec<String> },
    NodeCreation { identifier: String },
    NodeRemoval { identifier: String },
    LinkCreation { parent: String, child: String, weight: usize },
    DistanceComputation,
    ConflictsIdentification { identifiers: Vec<String> },
    VariantGroupsIdentification { groups: Vec<Vec<String>> },
    CombinationExtraction { removed: Vec<String> },
    NodesDowngrade { mapping: Vec<(String, String)> },
    PackagesExtraction { identifiers: Vec<String> },
    ResolutionFailure { error: String },
}

/// Append-only action record, disabled by default
#[derive(Debug, Default)]
pub struct History {
    enabled: bool,
    actions: Vec<Action>,
}

impl History {
    /// Create a recording history
    pub fn enabled() -> Self {
        History {
            enabled: true,
            actions: Vec::new(),
        }
    }

    /// Indicate whether actions are being recorded
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append *action* when recording is enabled
    pub fn record(&mut self, action: Action) {
        if self.enabled {
            self.actions.push(action);
        }
    }

    /// Return all recorded actions
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let mut history = History::default();
        history.record(Action::DistanceComputation);
        assert!(history.actions().is_empty());
    }

    #[test]
    fn test_record_order() {
        let mut history = History::enabled();
        history.record(Action::NodeCreation { identifier: "foo==0.1.0".to_string() });
        history.record(Action::NodeRemoval { identifier: "foo==0.1.0".to_string() });

        assert_eq!(
            history.actions(),
            &[
                Action::NodeCreation { identifier: "foo==0.1.0".to_string() },
                Action::NodeRemoval { identifier: "foo==0.1.0".to_string() },
            ]
        );
    }
}
