// src/resolver/plan.rs

//! Resolution result data structures

use crate::error::Result;
use crate::registry::Dependency;
use crate::version::{Constraint, Version};
use std::collections::BTreeMap;

use super::graph::{DependencyGraph, PackageNode};

/// A chosen package version and the requirements that selected it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: Version,
    /// Expected artifact digest, if the registry published one
    pub digest: Option<String>,
    /// (requester, constraint) pairs that led to this choice
    pub selected_by: Vec<(String, Constraint)>,
    /// Dependencies declared by the chosen version
    pub dependencies: Vec<Dependency>,
}

/// Result of dependency resolution: one exact version per reachable package
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    packages: BTreeMap<String, ResolvedPackage>,
    graph: DependencyGraph,
    roots: Vec<String>,
}

impl ResolvedGraph {
    pub(crate) fn new(
        packages: BTreeMap<String, ResolvedPackage>,
        graph: DependencyGraph,
        roots: Vec<String>,
    ) -> Self {
        Self {
            packages,
            graph,
            roots,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedPackage> {
        self.packages.get(name)
    }

    pub fn version(&self, name: &str) -> Option<&Version> {
        self.packages.get(name).map(|p| &p.version)
    }

    /// Packages in name order
    pub fn packages(&self) -> impl Iterator<Item = &ResolvedPackage> {
        self.packages.values()
    }

    /// Names of the root requests, in request order
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Installation order, dependencies before dependents
    pub fn install_order(&self) -> Result<Vec<String>> {
        self.graph.topological_order()
    }

    /// Chosen versions as plain nodes
    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.graph.nodes()
    }
}
