// src/resolver/graph.rs

//! Dependency graph data structures and algorithms
//!
//! Provides graph construction, topological ordering, cycle detection,
//! and constraint checking for chosen package versions. All maps are ordered
//! so traversal results are deterministic.

use crate::error::{Error, Result};
use crate::version::{Constraint, Version};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A node in the dependency graph representing a chosen package version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageNode {
    pub name: String,
    pub version: Version,
}

impl PackageNode {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// A dependency edge with version constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub constraint: Constraint,
    pub optional: bool,
}

impl DependencyEdge {
    pub fn required(from: impl Into<String>, to: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            constraint,
            optional: false,
        }
    }
}

/// Dependency graph for resolution and ordering
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Map from package name to its node
    nodes: BTreeMap<String, PackageNode>,
    /// Map from package name to its outgoing dependencies
    edges: BTreeMap<String, Vec<DependencyEdge>>,
    /// Map from package name to packages that depend on it (reverse edges)
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package node, replacing any node with the same name
    pub fn add_node(&mut self, node: PackageNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Add a dependency edge to the graph
    pub fn add_edge(&mut self, edge: DependencyEdge) {
        self.reverse_edges
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.from.clone());

        self.edges.entry(edge.from.clone()).or_default().push(edge);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Iterate nodes in name order
    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate every edge, grouped by source in name order
    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.values().flatten()
    }

    /// Get all dependencies of a package
    pub fn get_dependencies(&self, name: &str) -> Vec<&DependencyEdge> {
        self.edges.get(name).map(|v| v.iter().collect()).unwrap_or_default()
    }

    /// Get all packages that depend on this package (reverse dependencies)
    pub fn get_dependents(&self, name: &str) -> Vec<String> {
        self.reverse_edges
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Required edges whose target is present in the graph
    fn required_edges<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DependencyEdge> + 'a {
        self.edges
            .get(name)
            .into_iter()
            .flatten()
            .filter(|e| !e.optional && self.nodes.contains_key(&e.to))
    }

    /// Order packages so that every package comes after its required dependencies
    ///
    /// Kahn's algorithm on the reversed graph; ties are broken by name, so the
    /// order is stable across runs. Optional edges do not constrain the order.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for name in self.nodes.keys() {
            let deps: BTreeSet<&str> = self
                .required_edges(name)
                .map(|e| e.to.as_str())
                .collect();
            for dep in &deps {
                dependents.entry(*dep).or_default().insert(name.as_str());
            }
            remaining.insert(name.as_str(), deps);
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            remaining.remove(name);

            if let Some(parents) = dependents.get(name) {
                for parent in parents {
                    if let Some(deps) = remaining.get_mut(parent) {
                        deps.remove(name);
                        if deps.is_empty() {
                            ready.insert(*parent);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cycle = self
                .detect_cycle()
                .unwrap_or_else(|| remaining.keys().map(|s| s.to_string()).collect());
            return Err(Error::CyclicDependency(cycle));
        }

        Ok(order)
    }

    /// Detect a cycle among required dependency edges
    ///
    /// Returns the cycle as a path that starts and ends with the same package,
    /// e.g. `["a", "b", "a"]`, or None if the required edges form a DAG.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();

        for name in self.nodes.keys() {
            if !visited.contains(name.as_str())
                && let Some(cycle) = self.dfs_cycle_detect(name, &mut visited, &mut stack)
            {
                return Some(cycle);
            }
        }

        None
    }

    /// DFS helper for cycle detection; `stack` is the current recursion path
    fn dfs_cycle_detect<'a>(
        &'a self,
        name: &'a str,
        visited: &mut BTreeSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(name);
        stack.push(name);

        for edge in self.required_edges(name) {
            if let Some(pos) = stack.iter().position(|n| *n == edge.to) {
                let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(edge.to.clone());
                return Some(cycle);
            }
            if !visited.contains(edge.to.as_str())
                && let Some(cycle) = self.dfs_cycle_detect(&edge.to, visited, stack)
            {
                return Some(cycle);
            }
        }

        stack.pop();
        None
    }

    /// Edges whose target node exists but does not satisfy the edge constraint
    pub fn unsatisfied_edges(&self) -> Vec<&DependencyEdge> {
        self.edges()
            .filter(|e| {
                self.nodes
                    .get(&e.to)
                    .is_some_and(|node| !e.constraint.satisfies(&node.version))
            })
            .collect()
    }

    /// Packages reachable from `package_name` along dependency edges, itself included
    pub fn transitive_dependencies(&self, package_name: &str) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(package_name.to_string());

        while let Some(name) = queue.pop_front() {
            if !reached.insert(name.clone()) {
                continue;
            }
            for edge in self.get_dependencies(&name) {
                if self.nodes.contains_key(&edge.to) {
                    queue.push_back(edge.to.clone());
                }
            }
        }

        reached
    }
}
