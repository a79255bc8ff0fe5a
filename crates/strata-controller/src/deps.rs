//! Dependency resolution across layers.
//!
//! Two distinct concerns live here:
//!
//! - [`dependencies_satisfied`]: the per-pass gate. It reads the latest
//!   persisted statuses and answers whether every declared dependency is
//!   `DEPLOYED`. Stateless and re-entrant; a dependency cycle simply keeps
//!   the cyclic layers in `PENDING_APPLY` forever, an observable condition
//!   rather than a crash.
//! - [`DependencyGraph`]: admission-time tooling. Builds a directed graph
//!   over layer specs for deterministic deploy-order previews and cycle
//!   diagnostics. The reconcile path never consults it.

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use strata_core::LayerName;

use crate::error::{Error, Result};
use crate::layer::{Layer, LayerState};
use crate::store::LayerRepository;

/// Returns true only if every declared dependency's latest known status is
/// `DEPLOYED`.
///
/// Unknown or missing dependency entries count as not satisfied, never as
/// an error that aborts the pass.
///
/// # Errors
///
/// Returns an error only when the repository itself fails; absence of a
/// dependency is not an error.
pub async fn dependencies_satisfied(
    repo: &dyn LayerRepository,
    layer: &Layer,
) -> Result<bool> {
    for dep in &layer.spec.depends_on {
        match repo.get(dep).await? {
            Some(dep_layer) if dep_layer.status.state == LayerState::Deployed => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Directed dependency graph over layer specs.
///
/// Edges point from a dependency to its dependents, so a topological sort
/// yields a valid deploy order. Insertion order breaks ties for
/// reproducible output.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<LayerName, ()>,
    index_map: HashMap<LayerName, NodeIndex>,
    insertion_order: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// Creates a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a set of layers.
    #[must_use]
    pub fn from_layers<'a>(layers: impl IntoIterator<Item = &'a Layer>) -> Self {
        let mut graph = Self::new();
        for layer in layers {
            graph.add_layer(&layer.name, &layer.spec.depends_on);
        }
        graph
    }

    /// Returns the number of layers in the graph.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Adds a layer and its declared dependencies.
    ///
    /// Dependencies that were not added explicitly become nodes of their
    /// own, so dangling references still show up in the deploy order.
    pub fn add_layer(&mut self, name: &LayerName, depends_on: &[LayerName]) {
        let node = self.intern(name);
        for dep in depends_on {
            let dep_node = self.intern(dep);
            self.graph.add_edge(dep_node, node, ());
        }
    }

    fn intern(&mut self, name: &LayerName) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.clone());
        self.index_map.insert(name.clone(), idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Returns the layers in a valid deploy order.
    ///
    /// Kahn's algorithm with deterministic tie-breaking: when several
    /// layers have no unsatisfied dependencies, they come out in insertion
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `Error::DependencyCycle` naming the layers still blocked
    /// when the declarations contain a cycle.
    pub fn deploy_order(&self) -> Result<Vec<LayerName>> {
        let node_count = self.graph.node_count();
        if node_count == 0 {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(node_count);
        for idx in self.graph.node_indices() {
            in_degree.insert(idx, 0);
        }
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);
        while let Some(idx) = queue.pop_front() {
            if let Some(name) = self.graph.node_weight(idx) {
                result.push(name.clone());
            }

            let mut dependents: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
                .collect();
            dependents.sort_by_key(|n| {
                self.insertion_order
                    .iter()
                    .position(|&i| i == *n)
                    .unwrap_or(usize::MAX)
            });

            for dependent in dependents {
                if let Some(deg) = in_degree.get_mut(&dependent) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if result.len() != node_count {
            let cycle: Vec<String> = self
                .insertion_order
                .iter()
                .filter(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) > 0)
                .filter_map(|&idx| self.graph.node_weight(idx))
                .map(ToString::to_string)
                .collect();
            return Err(Error::DependencyCycle { cycle });
        }

        Ok(result)
    }

    /// Validates the declarations, returning the cycle diagnostic if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::DependencyCycle` when the declarations contain a
    /// cycle.
    pub fn validate(&self) -> Result<()> {
        self.deploy_order().map(|_| ())
    }
}
