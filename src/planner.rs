// src/planner.rs

//! Turning user intent into ChangeSets
//!
//! The planner owns the policy side of package management: which roots to
//! resolve, with which candidate ordering, and how the resolved graph is
//! recorded in the store. It never touches the store itself; every plan is
//! computed against a [`StoreState`] snapshot and carries that snapshot's
//! generation so a stale plan is rejected at commit.

use crate::error::{Error, Result};
use crate::registry::PackageSource;
use crate::resolver::{
    CandidatePolicy, PreferLatest, ResolvedGraph, Resolver, RootRequest, UpgradeSubtree,
    policy_from_name,
};
use crate::store::{InstalledPackage, StoreState};
use crate::transaction::ChangeSet;
use crate::version::Constraint;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, info};

/// Requester recorded for roots held at their installed version
pub const PINNED: &str = "(pinned)";

/// What an update should re-resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateTarget {
    /// Every root, latest versions preferred
    All,
    /// One package and its dependencies; other roots stay where they are
    Package(String),
}

/// Resolver limits and the default candidate policy
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub max_steps: usize,
    pub timeout: Option<Duration>,
    /// Policy name for installs and plain resolution
    pub policy: String,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_steps: crate::resolver::DEFAULT_MAX_STEPS,
            timeout: Some(crate::resolver::DEFAULT_TIMEOUT),
            policy: "prefer-installed".to_string(),
        }
    }
}

/// Plans installs, updates and removals against a registry
pub struct UpdatePlanner<'a> {
    source: &'a dyn PackageSource,
    settings: PlannerSettings,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> UpdatePlanner<'a> {
    pub fn new(source: &'a dyn PackageSource, settings: PlannerSettings) -> Self {
        Self {
            source,
            settings,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn resolver(&self, policy: Box<dyn CandidatePolicy>) -> Resolver {
        let resolver = Resolver::new()
            .with_boxed_policy(policy)
            .with_max_steps(self.settings.max_steps)
            .with_timeout(self.settings.timeout);
        match &self.cancel {
            Some(cancel) => resolver.with_cancel(Arc::clone(cancel)),
            None => resolver,
        }
    }

    /// Resolve requests on top of the installed roots without planning changes
    pub fn resolve(&self, state: &StoreState, requests: &[RootRequest]) -> Result<ResolvedGraph> {
        let (requests, _) = merge_requests(state, requests);
        self.resolver(policy_from_name(&self.settings.policy)?).resolve(
            &requests,
            &state.installed_versions(),
            self.source,
        )
    }

    /// Add (or re-constrain) roots
    pub fn plan_install(&self, state: &StoreState, requests: &[RootRequest]) -> Result<ChangeSet> {
        let (resolve_requests, recorded) = merge_requests(state, requests);
        let graph = self.resolver(policy_from_name(&self.settings.policy)?).resolve(
            &resolve_requests,
            &state.installed_versions(),
            self.source,
        )?;

        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
        let changeset = ChangeSet::compute(
            format!("install {}", names.join(", ")),
            state,
            target_from_graph(&graph, &recorded),
        );
        info!("Planned install of {}: {} operation(s)", names.join(", "), changeset.len());
        Ok(changeset)
    }

    /// Re-resolve all roots, or one package's subtree with everything else pinned
    ///
    /// `to` replaces the recorded constraint of the target (single-package
    /// updates only).
    pub fn plan_update(
        &self,
        state: &StoreState,
        target: &UpdateTarget,
        to: Option<Constraint>,
    ) -> Result<ChangeSet> {
        let mut recorded: BTreeMap<String, Constraint> = state
            .roots()
            .map(|p| (p.name.clone(), p.requested.clone().unwrap_or_default()))
            .collect();

        let (requests, policy, description): (Vec<RootRequest>, Box<dyn CandidatePolicy>, String) =
            match target {
                UpdateTarget::All => {
                    if to.is_some() {
                        return Err(Error::Config(
                            "a target constraint requires a package name".to_string(),
                        ));
                    }
                    let requests = recorded
                        .iter()
                        .map(|(name, constraint)| RootRequest::new(name.clone(), constraint.clone()))
                        .collect();
                    let policy: Box<dyn CandidatePolicy> = Box::new(PreferLatest);
                    (requests, policy, "update all".to_string())
                }
                UpdateTarget::Package(name) => {
                    let pkg = state
                        .get(name)
                        .ok_or_else(|| Error::NotFound(format!("package {} is not installed", name)))?;

                    let mut requests = Vec::new();
                    for root in state.roots() {
                        if &root.name == name {
                            let constraint = to
                                .clone()
                                .unwrap_or_else(|| root.requested.clone().unwrap_or_default());
                            recorded.insert(name.clone(), constraint.clone());
                            requests.push(RootRequest::new(name.clone(), constraint));
                        } else {
                            requests.push(
                                RootRequest::new(root.name.clone(), Constraint::exact(&root.version))
                                    .with_requester(PINNED),
                            );
                        }
                    }
                    if !pkg.root
                        && let Some(constraint) = &to
                    {
                        requests.push(RootRequest::new(name.clone(), constraint.clone()));
                    }

                    let subtree = state.dependency_graph().transitive_dependencies(name);
                    debug!("Upgrading subtree of {}: {:?}", name, subtree);
                    let policy: Box<dyn CandidatePolicy> = Box::new(UpgradeSubtree::new(subtree));
                    (requests, policy, format!("update {}", name))
                }
            };

        let graph = self
            .resolver(policy)
            .resolve(&requests, &state.installed_versions(), self.source)?;
        let changeset = ChangeSet::compute(description, state, target_from_graph(&graph, &recorded));
        info!("Planned {}: {} operation(s)", changeset.description, changeset.len());
        Ok(changeset)
    }

    /// Remove roots and garbage-collect dependencies nothing needs anymore
    pub fn plan_remove(&self, state: &StoreState, names: &[String]) -> Result<ChangeSet> {
        plan_remove(state, names)
    }
}

/// Requests to resolve and the constraint to record for each root
///
/// A new request for an installed root replaces its recorded constraint.
/// Several new requests for one name are all resolved, so incompatible ones
/// conflict, and their conjunction is recorded.
fn merge_requests(
    state: &StoreState,
    requests: &[RootRequest],
) -> (Vec<RootRequest>, BTreeMap<String, Constraint>) {
    let mut recorded: BTreeMap<String, Constraint> = BTreeMap::new();
    for request in requests {
        recorded
            .entry(request.name.clone())
            .and_modify(|c| *c = c.and(&request.constraint))
            .or_insert_with(|| request.constraint.clone());
    }

    let mut resolve: Vec<RootRequest> = requests.to_vec();
    for root in state.roots() {
        if !recorded.contains_key(&root.name) {
            let constraint = root.requested.clone().unwrap_or_default();
            resolve.push(RootRequest::new(root.name.clone(), constraint.clone()));
            recorded.insert(root.name.clone(), constraint);
        }
    }
    resolve.sort_by(|a, b| a.name.cmp(&b.name));
    (resolve, recorded)
}

/// Store entries for every package in a resolved graph
///
/// `roots` maps root names to the constraint recorded for them.
fn target_from_graph(
    graph: &ResolvedGraph,
    roots: &BTreeMap<String, Constraint>,
) -> BTreeMap<String, InstalledPackage> {
    graph
        .packages()
        .map(|pkg| {
            let required_by: BTreeSet<String> = graph
                .graph()
                .get_dependents(&pkg.name)
                .into_iter()
                .filter(|dependent| dependent != &pkg.name)
                .collect();
            let installed = InstalledPackage {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                required_by,
                root: roots.contains_key(&pkg.name),
                requested: roots.get(&pkg.name).cloned(),
                digest: pkg.digest.clone(),
            };
            (pkg.name.clone(), installed)
        })
        .collect()
}

/// Removal plan: refuses packages still needed by something that stays
pub fn plan_remove(state: &StoreState, names: &[String]) -> Result<ChangeSet> {
    let removing: BTreeSet<&str> = names.iter().map(String::as_str).collect();

    for name in &removing {
        let pkg = state
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("package {} is not installed", name)))?;
        let blockers: Vec<String> = pkg
            .required_by
            .iter()
            .filter(|r| !removing.contains(r.as_str()))
            .cloned()
            .collect();
        if !blockers.is_empty() {
            return Err(Error::RequiredBy {
                package: name.to_string(),
                required_by: blockers,
            });
        }
    }

    let mut remaining = state.packages.clone();
    let mut removed: BTreeSet<String> = removing.iter().map(|s| s.to_string()).collect();
    remaining.retain(|name, _| !removed.contains(name));

    // Drop back-references to removed packages until no new orphans appear
    loop {
        for pkg in remaining.values_mut() {
            pkg.required_by.retain(|r| !removed.contains(r));
        }
        let orphans: Vec<String> = remaining
            .values()
            .filter(|p| p.is_orphan())
            .map(|p| p.name.clone())
            .collect();
        if orphans.is_empty() {
            break;
        }
        for name in orphans {
            debug!("Removing {}: no remaining dependents", name);
            remaining.remove(&name);
            removed.insert(name);
        }
    }

    let changeset = ChangeSet::compute(format!("remove {}", names.join(", ")), state, remaining);
    info!("Planned removal of {}: {} operation(s)", names.join(", "), changeset.len());
    Ok(changeset)
}
