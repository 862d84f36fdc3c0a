// src/resolver/policy.rs

//! Candidate ordering policies
//!
//! The resolver always filters candidates the same way. A policy only decides
//! the order in which surviving candidates are tried, which is where the trade
//! off between minimal churn and freshness lives.

use crate::error::{Error, Result};
use crate::version::Version;
use std::collections::BTreeSet;

/// Decides the order in which candidate versions are tried
pub trait CandidatePolicy: Send + Sync {
    /// Reorder `candidates` (given highest first) for package `name`
    fn order(&self, name: &str, candidates: &mut Vec<Version>, installed: Option<&Version>);

    /// Short name for logs and config
    fn name(&self) -> &'static str;
}

/// Try the installed version first, then highest first
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferInstalled;

impl CandidatePolicy for PreferInstalled {
    fn order(&self, _name: &str, candidates: &mut Vec<Version>, installed: Option<&Version>) {
        promote_installed(candidates, installed);
    }

    fn name(&self) -> &'static str {
        "prefer-installed"
    }
}

/// Always highest first
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferLatest;

impl CandidatePolicy for PreferLatest {
    fn order(&self, _name: &str, _candidates: &mut Vec<Version>, _installed: Option<&Version>) {}

    fn name(&self) -> &'static str {
        "prefer-latest"
    }
}

/// Highest first inside a set of packages, installed first outside it
#[derive(Debug, Clone, Default)]
pub struct UpgradeSubtree {
    packages: BTreeSet<String>,
}

impl UpgradeSubtree {
    pub fn new(packages: impl IntoIterator<Item = String>) -> Self {
        Self {
            packages: packages.into_iter().collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains(name)
    }
}

impl CandidatePolicy for UpgradeSubtree {
    fn order(&self, name: &str, candidates: &mut Vec<Version>, installed: Option<&Version>) {
        if !self.packages.contains(name) {
            promote_installed(candidates, installed);
        }
    }

    fn name(&self) -> &'static str {
        "upgrade-subtree"
    }
}

/// Policy selected by its config name
pub fn policy_from_name(name: &str) -> Result<Box<dyn CandidatePolicy>> {
    match name {
        "prefer-installed" => Ok(Box::new(PreferInstalled)),
        "prefer-latest" => Ok(Box::new(PreferLatest)),
        other => Err(Error::Config(format!(
            "unknown resolver policy '{}' (expected prefer-installed or prefer-latest)",
            other
        ))),
    }
}

fn promote_installed(candidates: &mut Vec<Version>, installed: Option<&Version>) {
    if let Some(installed) = installed
        && let Some(pos) = candidates.iter().position(|v| v == installed)
    {
        let version = candidates.remove(pos);
        candidates.insert(0, version);
    }
}
