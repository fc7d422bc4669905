//! Dependency graph over resource specs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::PlanError;

use super::types::{ResourceId, ResourceSpec};

/// Directed acyclic graph of resources keyed by identifier.
///
/// Edges point from a resource to the resources it depends on. The reverse
/// adjacency (dependents) is kept alongside for deletion ordering and
/// failure propagation.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Specs in declaration order.
    specs: Vec<ResourceSpec>,
    /// Identifier to position in `specs`.
    positions: HashMap<ResourceId, usize>,
    /// Reverse edges.
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl Graph {
    /// Builds a graph from specs without checking references or cycles.
    ///
    /// [`GraphBuilder`](super::GraphBuilder) is the checked entry point.
    pub(crate) fn from_specs(specs: Vec<ResourceSpec>) -> Self {
        let positions = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id().clone(), i))
            .collect();

        let mut dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();
        for spec in &specs {
            for dep in spec.dependencies() {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(spec.id().clone());
            }
        }

        Self {
            specs,
            positions,
            dependents,
        }
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Gets a spec by identifier.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceSpec> {
        self.positions.get(id).map(|&i| &self.specs[i])
    }

    /// Returns true if the identifier is part of the graph.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.positions.contains_key(id)
    }

    /// Iterates over specs in declaration order.
    pub fn specs(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.specs.iter()
    }

    /// Returns the resources that directly depend on `id`.
    #[must_use]
    pub fn dependents(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.dependents
            .get(id)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// Returns the distinct resource kinds in the graph.
    #[must_use]
    pub fn kinds(&self) -> BTreeSet<&str> {
        self.specs.iter().map(|s| s.id().kind()).collect()
    }

    /// Returns identifiers in dependency order.
    ///
    /// Ties are broken by declaration order, so the result is stable for a
    /// given document.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::CycleDetected`] if the sort cannot complete.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>, PlanError> {
        let ids: Vec<ResourceId> = self.specs.iter().map(|s| s.id().clone()).collect();
        topological_sort(&ids, |id| {
            self.get(id).map(ResourceSpec::dependencies).unwrap_or_default()
        })
    }

    /// Finds a dependency cycle with a depth-first search.
    ///
    /// Returns the cycle as a path that starts and ends on the same
    /// identifier, or `None` if the graph is acyclic.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<ResourceId>> {
        let mut visited = vec![false; self.specs.len()];
        let mut on_stack = vec![false; self.specs.len()];
        let mut path = Vec::new();

        for start in 0..self.specs.len() {
            if !visited[start] {
                if let Some(cycle) = self.visit(start, &mut visited, &mut on_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        node: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        path: &mut Vec<usize>,
    ) -> Option<Vec<ResourceId>> {
        visited[node] = true;
        on_stack[node] = true;
        path.push(node);

        for dep in self.specs[node].dependencies() {
            let Some(&next) = self.positions.get(dep) else {
                continue;
            };

            if on_stack[next] {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<ResourceId> = path[start..]
                    .iter()
                    .map(|&n| self.specs[n].id().clone())
                    .collect();
                cycle.push(self.specs[next].id().clone());
                return Some(cycle);
            }

            if !visited[next] {
                if let Some(cycle) = self.visit(next, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_stack[node] = false;
        None
    }
}

/// Stable topological sort over `nodes`.
///
/// `dependencies` returns the identifiers a node depends on; identifiers
/// outside `nodes` are ignored. Among nodes that are ready at the same time,
/// the one appearing first in `nodes` wins.
///
/// # Errors
///
/// Returns [`PlanError::CycleDetected`] if some nodes can never become ready.
pub fn topological_sort<'a, F>(nodes: &[ResourceId], dependencies: F) -> Result<Vec<ResourceId>, PlanError>
where
    F: Fn(&ResourceId) -> &'a [ResourceId],
{
    let positions: HashMap<&ResourceId, usize> =
        nodes.iter().enumerate().map(|(i, id)| (id, i)).collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, id) in nodes.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for dep in dependencies(id) {
            if let Some(&d) = positions.get(dep) {
                if seen.insert(d) {
                    in_degree[i] += 1;
                    reverse[d].push(i);
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(next) = ready.pop_first() {
        order.push(nodes[next].clone());
        for &dependent in &reverse[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == nodes.len() {
        Ok(order)
    } else {
        Err(PlanError::CycleDetected {
            remaining: nodes.len() - order.len(),
        })
    }
}
