// src/store/mod.rs

//! Local package store
//!
//! The store is the single writable source of truth for what is installed and
//! why. It lives in one record file that is replaced by atomic rename on every
//! commit, so readers never see a partial write and `load` needs no lock.
//! Writers serialize on an exclusive `fs2` lock.
//!
//! # Layout
//!
//! ```text
//! <state_dir>/installed.db   {crc32}|{json} record
//! <state_dir>/store.lock     exclusive writer lock
//! ```

mod record;

pub use record::{decode, encode};

use crate::error::{Error, Result};
use crate::resolver::{DependencyEdge, DependencyGraph, PackageNode};
use crate::transaction::ChangeSet;
use crate::version::{Constraint, Version};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const RECORD_FILE: &str = "installed.db";
const LOCK_FILE: &str = "store.lock";

/// A package recorded as installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: Version,
    /// Installed packages whose dependencies pulled this one in
    #[serde(default)]
    pub required_by: BTreeSet<String>,
    /// Explicitly requested by the user
    #[serde(default)]
    pub root: bool,
    /// Constraint the user requested, for roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<Constraint>,
    /// Digest of the installed artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl InstalledPackage {
    /// Neither a root nor needed by anything
    pub fn is_orphan(&self) -> bool {
        !self.root && self.required_by.is_empty()
    }
}

/// Snapshot of the installed set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    /// Incremented on every commit
    pub generation: u64,
    /// Id of the last committed ChangeSet
    #[serde(default)]
    pub last_changeset: Option<String>,
    #[serde(default)]
    pub packages: BTreeMap<String, InstalledPackage>,
}

impl StoreState {
    pub fn get(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Name to version map, as consumed by the resolver's candidate policy
    pub fn installed_versions(&self) -> BTreeMap<String, Version> {
        self.packages
            .iter()
            .map(|(name, pkg)| (name.clone(), pkg.version.clone()))
            .collect()
    }

    pub fn roots(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.packages.values().filter(|p| p.root)
    }

    /// Why a package is installed: root marker plus required-by names
    pub fn why(&self, name: &str) -> Option<(bool, Vec<String>)> {
        self.packages
            .get(name)
            .map(|p| (p.root, p.required_by.iter().cloned().collect()))
    }

    /// Graph of installed packages with an edge from each requirer
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for pkg in self.packages.values() {
            graph.add_node(PackageNode::new(pkg.name.clone(), pkg.version.clone()));
        }
        for pkg in self.packages.values() {
            for requirer in &pkg.required_by {
                graph.add_edge(DependencyEdge::required(
                    requirer.clone(),
                    pkg.name.clone(),
                    Constraint::any(),
                ));
            }
        }
        graph
    }

    /// Installed names with dependencies before dependents
    ///
    /// Falls back to name order if the recorded edges contain a cycle (possible
    /// through optional dependencies).
    pub fn dependency_order(&self) -> Vec<String> {
        match self.dependency_graph().topological_order() {
            Ok(order) => order,
            Err(e) => {
                warn!("Using name order for store packages: {}", e);
                self.packages.keys().cloned().collect()
            }
        }
    }

    /// Validate the invariants every committed state must satisfy
    pub fn check_consistency(&self) -> Result<()> {
        for (key, pkg) in &self.packages {
            if key != &pkg.name {
                return Err(Error::StoreCorruption(format!(
                    "entry '{}' records name '{}'",
                    key, pkg.name
                )));
            }
            for requirer in &pkg.required_by {
                if !self.packages.contains_key(requirer) {
                    return Err(Error::StoreCorruption(format!(
                        "{} is required by {}, which is not installed",
                        pkg.name, requirer
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Handle on the store directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Read and validate the current state; a missing record is an empty store
    pub fn load(&self) -> Result<StoreState> {
        let path = self.record_path();
        match fs::read_to_string(&path) {
            Ok(text) => decode(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire the writer lock and capture a snapshot
    pub fn begin_transaction(&self) -> Result<StoreTransaction> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;

        // Retry lock acquisition with exponential backoff
        // Tries: 0ms, 100ms, 200ms, 400ms, 800ms (total ~1.5s wait)
        const MAX_RETRIES: u32 = 5;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match lock_file.try_lock_exclusive() {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        let delay = std::time::Duration::from_millis(100 * (1 << attempt));
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        if let Some(e) = last_error {
            return Err(Error::Lock(format!(
                "Failed to acquire store lock after {} retries. \
                 Another operation may be in progress. Error: {}",
                MAX_RETRIES, e
            )));
        }

        // Load under the lock so the snapshot matches what commit will compare against
        let snapshot = match self.load() {
            Ok(state) => state,
            Err(e) => {
                let _ = FileExt::unlock(&lock_file);
                return Err(e);
            }
        };
        debug!("Store transaction started at generation {}", snapshot.generation);

        Ok(StoreTransaction {
            store: self.clone(),
            lock_file: Some(lock_file),
            snapshot,
        })
    }

    /// Replace the record atomically: temp file, fsync, rename, fsync dir
    fn write_state(&self, state: &StoreState) -> Result<()> {
        let text = encode(state)?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(text.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(self.record_path()).map_err(|e| Error::Io(e.error))?;

        // Ignore errors from fsync on directory - not all filesystems support it
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// Result of committing a ChangeSet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// New state written at this generation
    Applied { generation: u64 },
    /// The store already records this ChangeSet as committed
    AlreadyApplied,
}

/// Exclusive write access to the store, released on drop
pub struct StoreTransaction {
    store: LocalStore,
    lock_file: Option<File>,
    snapshot: StoreState,
}

impl StoreTransaction {
    /// State at the time the lock was taken
    pub fn snapshot(&self) -> &StoreState {
        &self.snapshot
    }

    /// Re-read the record as it is on disk now
    pub fn current(&self) -> Result<StoreState> {
        self.store.load()
    }

    /// Write the ChangeSet's target state as one atomic replacement
    pub fn commit(&mut self, changeset: &ChangeSet) -> Result<CommitOutcome> {
        let current = self.store.load()?;

        if current.last_changeset.as_deref() == Some(changeset.id.as_str()) {
            debug!("ChangeSet {} already committed", changeset.id);
            return Ok(CommitOutcome::AlreadyApplied);
        }

        if current.generation != changeset.base_generation {
            return Err(Error::StaleChangeSet {
                id: changeset.id.clone(),
                planned: changeset.base_generation,
                current: current.generation,
            });
        }

        let next = StoreState {
            generation: current.generation + 1,
            last_changeset: Some(changeset.id.clone()),
            packages: changeset.target.clone(),
        };
        next.check_consistency()?;
        self.store.write_state(&next)?;

        info!(
            "Committed changeset {} ({} operation(s)) at generation {}",
            changeset.id,
            changeset.len(),
            next.generation
        );
        Ok(CommitOutcome::Applied {
            generation: next.generation,
        })
    }

    /// Rewrite the snapshot taken at `begin_transaction`
    pub fn restore(&mut self) -> Result<()> {
        let snapshot = self.snapshot.clone();
        self.restore_to(&snapshot)
    }

    /// Rewrite an arbitrary earlier state (crash recovery)
    pub fn restore_to(&mut self, state: &StoreState) -> Result<()> {
        state.check_consistency()?;
        self.store.write_state(state)?;
        warn!("Store restored to generation {}", state.generation);
        Ok(())
    }

    /// Release the lock without changes
    pub fn abort(mut self) -> Result<()> {
        if let Some(lock) = self.lock_file.take() {
            FileExt::unlock(&lock)?;
        }
        Ok(())
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        // Release lock if still held
        if let Some(ref lock) = self.lock_file {
            let _ = FileExt::unlock(lock);
        }
    }
}
