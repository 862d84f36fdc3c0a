// src/transaction/changeset.rs

//! ChangeSet: the ordered list of operations taking the store from one
//! consistent state to the next
//!
//! A ChangeSet records the store generation it was planned against and the
//! complete installed set to write on commit. Removals come first, dependents
//! before their dependencies; installs and upgrades follow, dependencies
//! before dependents.

use crate::store::{InstalledPackage, StoreState};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One step of a ChangeSet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Install {
        name: String,
        version: Version,
        digest: Option<String>,
    },
    /// Version change in either direction
    Upgrade {
        name: String,
        from: Version,
        to: Version,
        digest: Option<String>,
    },
    Remove {
        name: String,
        version: Version,
    },
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Self::Install { name, .. } | Self::Upgrade { name, .. } | Self::Remove { name, .. } => {
                name
            }
        }
    }

    /// Version that will be visible after the operation, if any
    pub fn new_version(&self) -> Option<&Version> {
        match self {
            Self::Install { version, .. } => Some(version),
            Self::Upgrade { to, .. } => Some(to),
            Self::Remove { .. } => None,
        }
    }

    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::Install { digest, .. } | Self::Upgrade { digest, .. } => digest.as_deref(),
            Self::Remove { .. } => None,
        }
    }

    /// Whether the operation needs an artifact
    pub fn needs_artifact(&self) -> bool {
        !matches!(self, Self::Remove { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install { name, version, .. } => write!(f, "install {} {}", name, version),
            Self::Upgrade { name, from, to, .. } if to < from => {
                write!(f, "downgrade {} {} -> {}", name, from, to)
            }
            Self::Upgrade { name, from, to, .. } => write!(f, "upgrade {} {} -> {}", name, from, to),
            Self::Remove { name, version } => write!(f, "remove {} {}", name, version),
        }
    }
}

/// Planned transition of the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Store generation this plan was computed against
    pub base_generation: u64,
    pub operations: Vec<Operation>,
    /// Complete installed set after commit
    pub target: BTreeMap<String, InstalledPackage>,
}

impl ChangeSet {
    /// Diff `current` against `target` and order the resulting operations
    pub fn compute(
        description: impl Into<String>,
        current: &StoreState,
        target: BTreeMap<String, InstalledPackage>,
    ) -> Self {
        let mut operations = Vec::new();

        // Removals: dependents first, so walk the current order backwards
        for name in current.dependency_order().iter().rev() {
            if !target.contains_key(name)
                && let Some(pkg) = current.get(name)
            {
                operations.push(Operation::Remove {
                    name: name.clone(),
                    version: pkg.version.clone(),
                });
            }
        }

        let target_state = StoreState {
            generation: current.generation,
            last_changeset: None,
            packages: target,
        };

        for name in target_state.dependency_order() {
            let Some(pkg) = target_state.get(&name) else {
                continue;
            };
            match current.get(&name) {
                None => operations.push(Operation::Install {
                    name: name.clone(),
                    version: pkg.version.clone(),
                    digest: pkg.digest.clone(),
                }),
                Some(old) if old.version != pkg.version => operations.push(Operation::Upgrade {
                    name: name.clone(),
                    from: old.version.clone(),
                    to: pkg.version.clone(),
                    digest: pkg.digest.clone(),
                }),
                Some(_) => {}
            }
        }

        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            created_at: Utc::now(),
            base_generation: current.generation,
            operations,
            target: target_state.packages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Operations that need an artifact fetched
    pub fn fetches(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.needs_artifact())
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "Nothing to do");
        }
        for (i, op) in self.operations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn pkg(name: &str, version: Version, required_by: &[&str], root: bool) -> InstalledPackage {
        InstalledPackage {
            name: name.to_string(),
            version,
            required_by: required_by.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            root,
            requested: None,
            digest: None,
        }
    }

    fn state(packages: Vec<InstalledPackage>) -> StoreState {
        StoreState {
            generation: 3,
            last_changeset: None,
            packages: packages.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    #[test]
    fn test_install_order_leaves_first() {
        let current = StoreState::default();
        let target = state(vec![
            pkg("app", Version::new(1, 2, 0), &[], true),
            pkg("lib", Version::new(1, 4, 0), &["app"], false),
            pkg("core", Version::new(0, 1, 0), &["lib"], false),
        ]);

        let cs = ChangeSet::compute("install app", &current, target.packages);
        let names: Vec<&str> = cs.operations.iter().map(|op| op.name()).collect();
        assert_eq!(names, vec!["core", "lib", "app"]);
        assert_eq!(cs.base_generation, 0);
    }

    #[test]
    fn test_remove_order_dependents_first() {
        let current = state(vec![
            pkg("a", Version::new(1, 0, 0), &[], true),
            pkg("b", Version::new(1, 0, 0), &["a"], false),
        ]);

        let cs = ChangeSet::compute("remove a", &current, BTreeMap::new());
        assert_eq!(
            cs.operations,
            vec![
                Operation::Remove {
                    name: "a".into(),
                    version: Version::new(1, 0, 0)
                },
                Operation::Remove {
                    name: "b".into(),
                    version: Version::new(1, 0, 0)
                },
            ]
        );
        assert_eq!(cs.base_generation, 3);
    }

    #[test]
    fn test_upgrade_and_unchanged() {
        let current = state(vec![
            pkg("app", Version::new(1, 0, 0), &[], true),
            pkg("lib", Version::new(1, 3, 0), &["app"], false),
        ]);
        let target = state(vec![
            pkg("app", Version::new(1, 0, 0), &[], true),
            pkg("lib", Version::new(1, 4, 0), &["app"], false),
        ]);

        let cs = ChangeSet::compute("update lib", &current, target.packages);
        assert_eq!(cs.len(), 1);
        assert!(matches!(
            &cs.operations[0],
            Operation::Upgrade { name, from, to, .. }
                if name == "lib" && *from == Version::new(1, 3, 0) && *to == Version::new(1, 4, 0)
        ));
        assert_eq!(cs.operations[0].to_string(), "upgrade lib 1.3.0 -> 1.4.0");
    }
}
