// src/resolver/mod.rs

//! Dependency resolution and conflict detection
//!
//! This module turns root requests into a [`ResolvedGraph`] holding exactly
//! one version per reachable package, or reports why no such graph exists.
//!
//! # Architecture
//!
//! - [`graph`]: dependency graph, cycle detection, topological ordering
//! - [`engine`]: backtracking search over registry metadata
//! - [`policy`]: pluggable candidate ordering (installed-first, latest, subtree)
//! - [`conflict`]: conflict diagnostics
//! - [`plan`]: resolution result types

pub mod conflict;
pub mod engine;
pub mod graph;
pub mod plan;
pub mod policy;

pub use conflict::{ConflictError, ConflictReason};
pub use engine::{DEFAULT_MAX_STEPS, DEFAULT_TIMEOUT, Resolver, RootRequest, USER_REQUEST};
pub use graph::{DependencyEdge, DependencyGraph, PackageNode};
pub use plan::{ResolvedGraph, ResolvedPackage};
pub use policy::{CandidatePolicy, PreferInstalled, PreferLatest, UpgradeSubtree, policy_from_name};
