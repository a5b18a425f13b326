//! Shortest-path distances from the graph root

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use indexmap::IndexMap;

use super::{Graph, ROOT};
use crate::history::Action;

/// Shortest distance of a reachable node, with the parent on the shortest
/// path and the full identifier path from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDistance {
    pub distance: usize,
    pub parent: String,
    pub path: Vec<String>,
}

/// Distances per node identifier; unreachable nodes have no entry.
pub type DistanceMapping = IndexMap<String, NodeDistance>;

/// Return the distance mapping for each reachable node of *graph*.
///
/// The distance of a node is the sum of the link weights along the shortest
/// path from the root, computed with Dijkstra's algorithm. Ties are broken
/// deterministically by the lexicographic order of the parent identifier
/// path, so that two runs over the same graph produce the same mapping.
pub fn compute_distance_mapping(graph: &Graph<'_>) -> DistanceMapping {
    log::debug!("Compute distance mapping...");

    let mut mapping = DistanceMapping::new();
    mapping.insert(
        ROOT.to_string(),
        NodeDistance {
            distance: 0,
            parent: ROOT.to_string(),
            path: Vec::new(),
        },
    );

    let mut queue: BinaryHeap<Reverse<(usize, String)>> = BinaryHeap::new();
    queue.push(Reverse((0, ROOT.to_string())));

    while let Some(Reverse((distance, identifier))) = queue.pop() {
        // Skip stale queue entries.
        let entry = match mapping.get(&identifier) {
            Some(entry) if entry.distance == distance => entry.clone(),
            _ => continue,
        };

        let mut path = entry.path.clone();
        path.push(identifier.clone());

        for child in graph.outgoing(&identifier) {
            let weight = match graph.link_weight(&child, &identifier) {
                Some(weight) => weight,
                None => continue,
            };
            let candidate = distance + weight;

            let improves = match mapping.get(&child) {
                None => true,
                Some(current) => {
                    candidate < current.distance
                        || (candidate == current.distance && path < current.path)
                }
            };

            if improves {
                log::debug!(
                    "Distance {} set to '{}' from '{}'",
                    candidate,
                    child,
                    identifier
                );

                mapping.insert(
                    child.clone(),
                    NodeDistance {
                        distance: candidate,
                        parent: identifier.clone(),
                        path: path.clone(),
                    },
                );
                queue.push(Reverse((candidate, child)));
            }
        }
    }

    graph.context().record(|| Action::DistanceComputation);

    mapping
}
