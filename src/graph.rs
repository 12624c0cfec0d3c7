//! Resource dependency graph.
//!
//! This module builds the in-memory graph of declared resources and their
//! dependency edges. Construction rejects duplicate identifiers, references
//! to undeclared resources, and dependency cycles; the surviving graph is a
//! DAG with a deterministic topological order used by the planner.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::debug;

use crate::config::ResourceSpec;
use crate::error::{ConfigError, GroundplanError, Result};

/// Dependency graph over declared resources.
///
/// Holds the specs in declaration order plus derived adjacency
/// (dependency to dependents) and a precomputed topological order.
/// Among resources with no ordering constraint between them, the
/// topological order preserves declaration order, so identical manifests
/// always produce identical plans.
#[derive(Debug)]
pub struct ResourceGraph {
    /// Declared specs, in declaration order.
    specs: Vec<ResourceSpec>,
    /// Identifier to declaration index.
    index: HashMap<String, usize>,
    /// For each spec index, the indices of resources that depend on it.
    dependents: Vec<Vec<usize>>,
    /// Declaration indices in topological order.
    topo: Vec<usize>,
}

impl ResourceGraph {
    /// Builds a graph from declared resource specs.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource` if two specs share an identifier,
    /// `UnknownReference` if a spec depends on an undeclared identifier,
    /// and `CycleDetected` if the dependency edges form a cycle.
    pub fn build(specs: Vec<ResourceSpec>) -> Result<Self> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(specs.len());

        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.id.clone(), i).is_some() {
                return Err(GroundplanError::Config(ConfigError::DuplicateResource {
                    id: spec.id.clone(),
                }));
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        let mut indegree: Vec<usize> = vec![0; specs.len()];

        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                let Some(&dep_idx) = index.get(dep) else {
                    return Err(GroundplanError::Config(ConfigError::UnknownReference {
                        id: dep.clone(),
                        required_by: spec.id.clone(),
                    }));
                };
                dependents[dep_idx].push(i);
                indegree[i] += 1;
            }
        }

        // Kahn's algorithm. The ready heap always yields the smallest
        // declaration index, which keeps the order stable across runs.
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut topo = Vec::with_capacity(specs.len());
        let mut remaining = indegree.clone();

        while let Some(Reverse(i)) = ready.pop() {
            topo.push(i);
            for &dep_idx in &dependents[i] {
                remaining[dep_idx] -= 1;
                if remaining[dep_idx] == 0 {
                    ready.push(Reverse(dep_idx));
                }
            }
        }

        if topo.len() < specs.len() {
            let path = find_cycle(&specs, &index, &remaining);
            return Err(GroundplanError::Config(ConfigError::CycleDetected { path }));
        }

        debug!("Built resource graph with {} nodes", specs.len());

        Ok(Self {
            specs,
            index,
            dependents,
            topo,
        })
    }

    /// Returns the number of resources in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Returns true if the graph contains the given identifier.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the spec for the given identifier.
    #[must_use]
    pub fn spec(&self, id: &str) -> Option<&ResourceSpec> {
        self.index.get(id).map(|&i| &self.specs[i])
    }

    /// Returns the identifiers the given resource depends on.
    #[must_use]
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.index
            .get(id)
            .map_or(&[], |&i| self.specs[i].depends_on.as_slice())
    }

    /// Returns the identifiers of resources that depend on the given one.
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependents[i]
                .iter()
                .map(|&j| self.specs[j].id.as_str())
                .collect()
        })
    }

    /// Iterates over specs in topological order.
    ///
    /// For every dependency edge, the dependency appears before its
    /// dependents.
    pub fn topo_iter(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.topo.iter().map(|&i| &self.specs[i])
    }

    /// Returns identifiers in topological order.
    #[must_use]
    pub fn topo_ids(&self) -> Vec<&str> {
        self.topo.iter().map(|&i| self.specs[i].id.as_str()).collect()
    }
}

/// Recovers a cycle path among nodes left unresolved by Kahn's algorithm.
///
/// `remaining` holds the residual indegrees; every node with a nonzero
/// residual indegree is part of, or downstream of, a cycle. Walking
/// dependency edges restricted to those nodes must revisit a node.
fn find_cycle(
    specs: &[ResourceSpec],
    index: &HashMap<String, usize>,
    remaining: &[usize],
) -> String {
    let unresolved: Vec<usize> = remaining
        .iter()
        .enumerate()
        .filter(|&(_, &deg)| deg > 0)
        .map(|(i, _)| i)
        .collect();

    let Some(&start) = unresolved.first() else {
        return String::from("unknown");
    };

    let mut path: Vec<usize> = Vec::new();
    let mut on_path: Vec<bool> = vec![false; specs.len()];
    let mut current = start;

    loop {
        if on_path[current] {
            // Cut the tail before the first occurrence of `current`
            let pos = path
                .iter()
                .position(|&i| i == current)
                .unwrap_or(0);
            let mut cycle: Vec<&str> =
                path[pos..].iter().map(|&i| specs[i].id.as_str()).collect();
            cycle.push(specs[current].id.as_str());
            return cycle.join(" -> ");
        }

        on_path[current] = true;
        path.push(current);

        // Follow any dependency edge that stays within the unresolved set
        let next = specs[current]
            .depends_on
            .iter()
            .filter_map(|dep| index.get(dep).copied())
            .find(|&i| remaining[i] > 0);

        match next {
            Some(i) => current = i,
            None => return specs[current].id.clone(),
        }
    }
}
