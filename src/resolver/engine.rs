// src/resolver/engine.rs

//! Dependency resolver implementation
//!
//! Deterministic chronological backtracking over an explicit decision stack:
//!
//! 1. Root requests seed the requirement set.
//! 2. Among packages that are required but not yet chosen, pick the one with
//!    the fewest remaining candidates (ties by name).
//! 3. Choose its first candidate in policy order (highest first, or the
//!    installed version first), record a decision holding a snapshot of the
//!    search state, and add the chosen version's dependencies as requirements.
//! 4. When a package runs out of candidates, or a new requirement rejects an
//!    already chosen version, restore the most recent snapshot and exclude the
//!    version that decision tried.
//!
//! The search is bounded by a step budget and an optional wall-clock budget,
//! and can be cancelled through a shared flag.

use crate::error::{Error, Result};
use crate::registry::{Dependency, PackageSource, PackageSpec, check_path_safe_name};
use crate::version::{Constraint, Version};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::conflict::{ConflictError, ConflictReason, minimal_unsatisfiable};
use super::graph::{DependencyEdge, DependencyGraph, PackageNode};
use super::plan::{ResolvedGraph, ResolvedPackage};
use super::policy::{CandidatePolicy, PreferInstalled};

/// Requester name recorded for requests made directly by the user
pub const USER_REQUEST: &str = "(request)";

/// Default bound on search steps
pub const DEFAULT_MAX_STEPS: usize = 100_000;

/// Default bound on wall-clock time spent resolving
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A top-level package request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRequest {
    pub name: String,
    pub constraint: Constraint,
    /// Who asked for it, reported in conflicts
    pub requester: String,
}

impl RootRequest {
    pub fn new(name: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            name: name.into(),
            constraint,
            requester: USER_REQUEST.to_string(),
        }
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    /// Parse `name`, `name@constraint` or `name<op>constraint`
    ///
    /// Examples: `app`, `app@^1.2`, `app>=1.0,<2.0`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (name, constraint) = match text.split_once('@') {
            Some((name, constraint)) => (name, constraint),
            None => match text.find(|c: char| "<>=~^!".contains(c)) {
                Some(pos) => text.split_at(pos),
                None => (text, ""),
            },
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConstraint(format!("'{}': missing package name", text)));
        }

        Ok(Self::new(name, Constraint::parse(constraint)?))
    }
}

/// Dependency resolver
pub struct Resolver {
    policy: Box<dyn CandidatePolicy>,
    max_steps: usize,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Resolver with the installed-first policy and default bounds
    pub fn new() -> Self {
        Self {
            policy: Box::new(PreferInstalled),
            max_steps: DEFAULT_MAX_STEPS,
            timeout: Some(DEFAULT_TIMEOUT),
            cancel: None,
        }
    }

    pub fn with_policy(mut self, policy: impl CandidatePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_boxed_policy(mut self, policy: Box<dyn CandidatePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Wall-clock bound; `None` disables it
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cancel token - set to true to abort the search
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Resolve root requests into one exact version per reachable package
    ///
    /// `installed` is consulted only by the candidate policy. Unknown required
    /// packages fail immediately with `Error::NotFound`; unknown optional
    /// dependencies are skipped.
    pub fn resolve(
        &self,
        requests: &[RootRequest],
        installed: &BTreeMap<String, Version>,
        source: &dyn PackageSource,
    ) -> Result<ResolvedGraph> {
        info!(
            "Resolving {} request(s) with {} policy",
            requests.len(),
            self.policy.name()
        );

        let mut search = Search {
            resolver: self,
            source,
            installed,
            specs: BTreeMap::new(),
            steps: 0,
            started: Instant::now(),
            last_genuine: None,
            last_dead_end: None,
        };

        let state = search.run(requests)?;
        let resolved = search.build(requests, &state)?;

        info!(
            "Resolved {} package(s) in {} step(s)",
            resolved.len(),
            search.steps
        );
        Ok(resolved)
    }
}

#[derive(Debug, Clone)]
struct Requirement {
    requester: String,
    constraint: Constraint,
    optional: bool,
}

/// Everything a decision may change, captured in each snapshot
#[derive(Debug, Clone, Default)]
struct SearchState {
    requirements: BTreeMap<String, Vec<Requirement>>,
    selected: BTreeMap<String, Version>,
    excluded: BTreeMap<String, BTreeSet<Version>>,
}

impl SearchState {
    fn requirement_pairs(&self, name: &str) -> Vec<(String, Constraint)> {
        self.requirements
            .get(name)
            .map(|reqs| {
                reqs.iter()
                    .map(|r| (r.requester.clone(), r.constraint.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A choice point on the decision stack
struct Decision {
    package: String,
    version: Version,
    snapshot: SearchState,
}

/// One resolution run
struct Search<'a> {
    resolver: &'a Resolver,
    source: &'a dyn PackageSource,
    installed: &'a BTreeMap<String, Version>,
    /// Registry metadata, fetched once per run; `None` means unknown package
    specs: BTreeMap<String, Option<PackageSpec>>,
    steps: usize,
    started: Instant,
    /// Most recent dead end caused by the requirements themselves
    last_genuine: Option<ConflictError>,
    /// Most recent dead end of any kind
    last_dead_end: Option<ConflictError>,
}

impl Search<'_> {
    fn run(&mut self, requests: &[RootRequest]) -> Result<SearchState> {
        let mut state = SearchState::default();
        for request in requests {
            state
                .requirements
                .entry(request.name.clone())
                .or_default()
                .push(Requirement {
                    requester: request.requester.clone(),
                    constraint: request.constraint.clone(),
                    optional: false,
                });
        }

        let mut stack: Vec<Decision> = Vec::new();

        loop {
            self.check_budget(&state)?;

            let pending = self.pending_packages(&state)?;
            if pending.is_empty() {
                return Ok(state);
            }

            let mut best: Option<(String, Vec<Version>)> = None;
            let mut dead_end = None;
            for name in pending {
                let candidates = self.candidates(&name, &state);
                if candidates.is_empty() {
                    dead_end = Some(name);
                    break;
                }
                if best
                    .as_ref()
                    .is_none_or(|(_, current)| candidates.len() < current.len())
                {
                    best = Some((name, candidates));
                }
            }

            if let Some(name) = dead_end {
                debug!("No candidates left for {}", name);
                self.record_dead_end(&name, &state);
                state = self.backtrack(&mut stack)?;
                continue;
            }

            let Some((name, candidates)) = best else {
                return Ok(state);
            };
            let version = candidates[0].clone();
            debug!(
                "Choosing {} {} ({} candidate(s), depth {})",
                name,
                version,
                candidates.len(),
                stack.len()
            );

            stack.push(Decision {
                package: name.clone(),
                version: version.clone(),
                snapshot: state.clone(),
            });
            state.selected.insert(name.clone(), version.clone());

            let mut clash = None;
            for dep in self.dependencies_of(&name, &version) {
                if clash.is_none()
                    && let Some(chosen) = state.selected.get(&dep.name)
                    && !dep.constraint.satisfies(chosen)
                {
                    clash = Some(dep.name.clone());
                }
                state
                    .requirements
                    .entry(dep.name)
                    .or_default()
                    .push(Requirement {
                        requester: name.clone(),
                        constraint: dep.constraint,
                        optional: dep.optional,
                    });
            }

            if let Some(target) = clash {
                debug!("{} {} rejects chosen version of {}", name, version, target);
                self.record_dead_end(&target, &state);
                state = self.backtrack(&mut stack)?;
            }
        }
    }

    /// Required-but-unchosen packages in name order, skipping unknown optional ones
    fn pending_packages(&mut self, state: &SearchState) -> Result<Vec<String>> {
        let open: Vec<String> = state
            .requirements
            .keys()
            .filter(|name| !state.selected.contains_key(*name))
            .cloned()
            .collect();

        let mut pending = Vec::with_capacity(open.len());
        for name in open {
            if self.ensure_spec(&name)? {
                pending.push(name);
                continue;
            }

            let reqs = state.requirements.get(&name).map(Vec::as_slice).unwrap_or_default();
            if reqs.iter().all(|r| r.optional) {
                continue;
            }

            let requesters: Vec<&str> = reqs
                .iter()
                .filter(|r| !r.optional)
                .map(|r| r.requester.as_str())
                .collect();
            return Err(Error::NotFound(format!(
                "package {} (required by {})",
                name,
                requesters.join(", ")
            )));
        }

        Ok(pending)
    }

    /// Fetch metadata once; returns whether the package exists
    ///
    /// Every root and dependency name passes through here, so names that
    /// could not be laid out under the install root stop the run.
    fn ensure_spec(&mut self, name: &str) -> Result<bool> {
        check_path_safe_name(name)?;
        if let Some(cached) = self.specs.get(name) {
            return Ok(cached.is_some());
        }

        let spec = match self.source.get_package_spec(name) {
            Ok(spec) => Some(spec),
            Err(Error::NotFound(_)) => {
                debug!("Registry has no package {}", name);
                None
            }
            Err(e) => return Err(e),
        };
        let exists = spec.is_some();
        self.specs.insert(name.to_string(), spec);
        Ok(exists)
    }

    fn spec(&self, name: &str) -> Option<&PackageSpec> {
        self.specs.get(name).and_then(Option::as_ref)
    }

    /// Remaining candidates in the order they should be tried
    fn candidates(&self, name: &str, state: &SearchState) -> Vec<Version> {
        let Some(spec) = self.spec(name) else {
            return Vec::new();
        };
        let reqs = state.requirements.get(name).map(Vec::as_slice).unwrap_or_default();
        let excluded = state.excluded.get(name);

        let mut candidates: Vec<Version> = spec
            .versions_descending()
            .filter(|v| excluded.is_none_or(|ex| !ex.contains(*v)))
            .filter(|v| reqs.iter().all(|r| r.constraint.satisfies(v)))
            .cloned()
            .collect();

        self.resolver
            .policy
            .order(name, &mut candidates, self.installed.get(name));
        candidates
    }

    fn dependencies_of(&self, name: &str, version: &Version) -> Vec<Dependency> {
        self.spec(name)
            .and_then(|spec| spec.entry(version))
            .map(|entry| entry.all_dependencies())
            .unwrap_or_default()
    }

    fn record_dead_end(&mut self, name: &str, state: &SearchState) {
        let pairs = state.requirement_pairs(name);
        let available: Vec<Version> = self
            .spec(name)
            .map(|spec| spec.versions.keys().cloned().collect())
            .unwrap_or_default();

        match minimal_unsatisfiable(&pairs, &available) {
            Some(minimal) => {
                self.last_genuine = Some(ConflictError {
                    package: name.to_string(),
                    constraints: minimal,
                    reason: ConflictReason::Incompatible,
                });
            }
            None => {
                self.last_dead_end = Some(ConflictError {
                    package: name.to_string(),
                    constraints: pairs,
                    reason: ConflictReason::Incompatible,
                });
            }
        }
    }

    fn backtrack(&mut self, stack: &mut Vec<Decision>) -> Result<SearchState> {
        let Some(decision) = stack.pop() else {
            return Err(self.best_conflict(ConflictReason::Incompatible, None).into());
        };

        debug!("Backtracking: excluding {} {}", decision.package, decision.version);
        let mut state = decision.snapshot;
        state
            .excluded
            .entry(decision.package)
            .or_default()
            .insert(decision.version);
        Ok(state)
    }

    fn best_conflict(&self, reason: ConflictReason, state: Option<&SearchState>) -> ConflictError {
        let base = self
            .last_genuine
            .clone()
            .or_else(|| self.last_dead_end.clone());

        match base {
            Some(conflict) => ConflictError { reason, ..conflict },
            None => {
                let package = state
                    .and_then(|s| {
                        s.requirements
                            .keys()
                            .find(|name| !s.selected.contains_key(*name))
                            .cloned()
                    })
                    .unwrap_or_default();
                let constraints = state
                    .map(|s| s.requirement_pairs(&package))
                    .unwrap_or_default();
                ConflictError {
                    package,
                    constraints,
                    reason,
                }
            }
        }
    }

    fn check_budget(&mut self, state: &SearchState) -> Result<()> {
        self.steps += 1;

        if self
            .resolver
            .cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
        {
            return Err(Error::Cancelled("dependency resolution".to_string()));
        }

        if self.steps > self.resolver.max_steps {
            let reason = ConflictReason::StepLimit {
                steps: self.resolver.max_steps,
            };
            return Err(self.best_conflict(reason, Some(state)).into());
        }

        if let Some(timeout) = self.resolver.timeout {
            let elapsed = self.started.elapsed();
            if elapsed > timeout {
                let reason = ConflictReason::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                };
                return Err(self.best_conflict(reason, Some(state)).into());
            }
        }

        Ok(())
    }

    fn build(&self, requests: &[RootRequest], state: &SearchState) -> Result<ResolvedGraph> {
        let mut graph = DependencyGraph::new();
        let mut packages = BTreeMap::new();

        for (name, version) in &state.selected {
            graph.add_node(PackageNode::new(name.clone(), version.clone()));
        }

        for (name, version) in &state.selected {
            let entry = self.spec(name).and_then(|spec| spec.entry(version));
            let dependencies = entry.map(|e| e.all_dependencies()).unwrap_or_default();

            for dep in &dependencies {
                if state.selected.contains_key(&dep.name) {
                    graph.add_edge(DependencyEdge {
                        from: name.clone(),
                        to: dep.name.clone(),
                        constraint: dep.constraint.clone(),
                        optional: dep.optional,
                    });
                }
            }

            packages.insert(
                name.clone(),
                ResolvedPackage {
                    name: name.clone(),
                    version: version.clone(),
                    digest: entry.and_then(|e| e.sha256.clone()),
                    selected_by: state.requirement_pairs(name),
                    dependencies,
                },
            );
        }

        if let Some(cycle) = graph.detect_cycle() {
            return Err(Error::CyclicDependency(cycle));
        }

        let mut roots: Vec<String> = Vec::new();
        for request in requests {
            if !roots.contains(&request.name) {
                roots.push(request.name.clone());
            }
        }

        Ok(ResolvedGraph::new(packages, graph, roots))
    }
}
