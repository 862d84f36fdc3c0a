// src/resolver/conflict.rs

//! Conflict types for dependency resolution
//!
//! A conflict names the package whose candidate set became empty together
//! with the smallest set of (requester, constraint) pairs that no registry
//! version can satisfy at once.

use crate::version::{Constraint, Version};
use std::fmt;

/// Why resolution stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The listed requirements cannot be reconciled
    Incompatible,
    /// The step budget ran out before a solution was found
    StepLimit { steps: usize },
    /// The wall-clock budget ran out before a solution was found
    Timeout { elapsed_ms: u64 },
}

/// Multiple packages require incompatible versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictError {
    pub package: String,
    /// (requester, constraint) pairs
    pub constraints: Vec<(String, Constraint)>,
    pub reason: ConflictReason,
}

impl ConflictError {
    /// Requester names in report order
    pub fn requesters(&self) -> Vec<&str> {
        self.constraints.iter().map(|(r, _)| r.as_str()).collect()
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            ConflictReason::Incompatible => {}
            ConflictReason::StepLimit { steps } => {
                writeln!(f, "Resolution gave up after {} steps", steps)?;
            }
            ConflictReason::Timeout { elapsed_ms } => {
                writeln!(f, "Resolution timed out after {}ms", elapsed_ms)?;
            }
        }

        write!(f, "Conflicting version requirements for package {}:", self.package)?;
        for (requirer, constraint) in &self.constraints {
            write!(f, "\n  - {} requires {}", requirer, constraint)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConflictError {}

/// Smallest subset of `requirements` that no version in `available` satisfies
///
/// Tries single requirements first, then pairs. Returns None when some
/// available version satisfies every requirement, in which case the dead end
/// was caused by earlier decisions rather than by the requirements themselves.
pub(crate) fn minimal_unsatisfiable(
    requirements: &[(String, Constraint)],
    available: &[Version],
) -> Option<Vec<(String, Constraint)>> {
    let admits = |set: &[&Constraint]| {
        available
            .iter()
            .any(|v| set.iter().all(|c| c.satisfies(v)))
    };

    let everything: Vec<&Constraint> = requirements.iter().map(|(_, c)| c).collect();
    if admits(&everything) {
        return None;
    }

    for req in requirements {
        if !admits(&[&req.1]) {
            return Some(vec![req.clone()]);
        }
    }

    for (i, first) in requirements.iter().enumerate() {
        for second in &requirements[i + 1..] {
            if !admits(&[&first.1, &second.1]) {
                return Some(vec![first.clone(), second.clone()]);
            }
        }
    }

    Some(requirements.to_vec())
}
