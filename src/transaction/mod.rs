// src/transaction/mod.rs

//! Transaction engine for applying ChangeSets
//!
//! An [`Installer`] takes the store from one consistent state to the next.
//! Everything that can fail for ordinary reasons (network, integrity,
//! unpacking) happens in a scratch area before the store is touched, so
//! those failures roll back by discarding scratch.
//!
//! # Lifecycle
//!
//! ```text
//! RESOLVED -> FETCHING -> VERIFYING -> STAGING -> COMMITTING -> DONE
//!                                                    ^
//!                      store record replaced here; later failures undo
//!                      directory swaps and restore the snapshot
//! ```
//!
//! Every apply writes a journal under `<state>/journal` so an interrupted
//! run can be rolled back by [`recovery`] on the next start.
//!
//! # Scratch layout
//!
//! ```text
//! <state>/txn/<changeset-id>/fetch/    downloaded artifacts
//! <state>/txn/<changeset-id>/stage/    unpacked package directories
//! <state>/txn/<changeset-id>/backup/   live directories being replaced
//! ```

mod changeset;
mod journal;
pub mod recovery;
mod unpack;

pub use changeset::{ChangeSet, Operation};
pub use journal::{JournalRecord, TransactionJournal, find_incomplete_journals};
pub use recovery::RecoveryOutcome;
pub use unpack::{ArtifactUnpacker, CopyUnpacker, TarballUnpacker};

use crate::error::{Error, Result};
use crate::hash::IntegrityVerifier;
use crate::progress::ProgressTracker;
use crate::registry::{ArtifactFetcher, check_path_safe_name};
use crate::store::{CommitOutcome, LocalStore, StoreTransaction};
use crate::version::Version;
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FETCH_DIR: &str = "fetch";
const STAGE_DIR: &str = "stage";
const BACKUP_DIR: &str = "backup";

/// Default number of concurrent artifact downloads
pub const DEFAULT_WORKERS: usize = 4;

/// Default fetch attempts per artifact
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first fetch retry; doubles per attempt
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Upper bound on a single retry delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Highest accepted `max_attempts`
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// How often a backoff sleep wakes to check for cancellation
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Installer state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallStage {
    /// ChangeSet computed, nothing fetched
    Resolved,
    /// Downloading artifacts into scratch
    Fetching,
    /// Checking artifact digests
    Verifying,
    /// Unpacking into invisible directories
    Staging,
    /// Store commit and directory swaps
    Committing,
    Done,
    RolledBack,
}

impl InstallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::Staging => "staging",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::RolledBack => "rolled back",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installer configuration
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Where visible package directories live
    pub install_root: PathBuf,
    /// Scratch directories, one per ChangeSet
    pub txn_dir: PathBuf,
    /// Directory for transaction journals
    pub journal_dir: PathBuf,
    /// Size of the fetch thread pool
    pub workers: usize,
    /// Fetch attempts per artifact, counting the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff: Duration,
    /// Fail versions whose registry entry has no digest
    pub require_digest: bool,
}

impl InstallerConfig {
    /// Derive scratch and journal directories from the store directory
    pub fn new(state_dir: &Path, install_root: PathBuf) -> Self {
        Self {
            install_root,
            txn_dir: state_dir.join("txn"),
            journal_dir: state_dir.join("journal"),
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            require_digest: false,
        }
    }

    /// Scratch directory for one ChangeSet
    pub fn work_dir(&self, changeset_id: &str) -> PathBuf {
        self.txn_dir.join(changeset_id)
    }
}

/// Options for controlling execution
#[derive(Default, Clone)]
pub struct InstallOptions {
    /// Cancel token - set to true to request cancellation
    pub cancel: Option<Arc<AtomicBool>>,
    /// Progress tracker for fetch progress
    pub progress: Option<Arc<dyn ProgressTracker>>,
}

impl InstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return Cancelled error if cancellation requested
    fn check_cancelled(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(operation.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Summary of a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub changeset_id: String,
    /// Store generation after the commit
    pub generation: u64,
    pub installed: usize,
    pub upgraded: usize,
    pub removed: usize,
    /// The store already recorded this ChangeSet; nothing was changed
    pub already_applied: bool,
    pub duration_ms: u64,
}

impl ApplyReport {
    fn new(changeset: &ChangeSet, generation: u64, already_applied: bool, start: Instant) -> Self {
        let count = |pred: fn(&Operation) -> bool| {
            changeset.operations.iter().filter(|op| pred(op)).count()
        };
        Self {
            changeset_id: changeset.id.clone(),
            generation,
            installed: count(|op| matches!(op, Operation::Install { .. })),
            upgraded: count(|op| matches!(op, Operation::Upgrade { .. })),
            removed: count(|op| matches!(op, Operation::Remove { .. })),
            already_applied,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// How an apply ended
#[derive(Debug)]
pub enum ApplyOutcome {
    Done(ApplyReport),
    /// Nothing visible changed; `stage` is where the failure happened
    RolledBack { stage: InstallStage, reason: Error },
}

impl ApplyOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Turn a rollback into its underlying error
    pub fn into_result(self) -> Result<ApplyReport> {
        match self {
            Self::Done(report) => Ok(report),
            Self::RolledBack { reason, .. } => Err(reason),
        }
    }
}

/// Artifact downloaded into scratch
#[derive(Debug)]
struct FetchedArtifact {
    name: String,
    version: Version,
    path: PathBuf,
    bytes: u64,
    digest: Option<String>,
}

/// One package directory swap, undoable from any intermediate point
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Swap {
    package: String,
    live: PathBuf,
    backup: Option<PathBuf>,
    staged: Option<PathBuf>,
}

impl Swap {
    fn record(&self) -> JournalRecord {
        JournalRecord::Swap {
            package: self.package.clone(),
            live: self.live.clone(),
            backup: self.backup.clone(),
            staged: self.staged.clone(),
        }
    }

    pub(crate) fn from_record(record: &JournalRecord) -> Option<Self> {
        match record {
            JournalRecord::Swap {
                package,
                live,
                backup,
                staged,
            } => Some(Self {
                package: package.clone(),
                live: live.clone(),
                backup: backup.clone(),
                staged: staged.clone(),
            }),
            _ => None,
        }
    }

    fn perform(&self) -> io::Result<()> {
        if let Some(backup) = &self.backup {
            unpack::move_dir(&self.live, backup)?;
        }
        if let Some(staged) = &self.staged {
            unpack::move_dir(staged, &self.live)?;
        }
        Ok(())
    }

    /// Put the previous live directory back
    ///
    /// Works from whichever point the swap reached: the staged directory
    /// still existing means it never went live, and a backup that does
    /// not exist yet means the old directory never moved.
    pub(crate) fn undo(&self) -> io::Result<()> {
        let staged_went_live = self.staged.as_ref().is_some_and(|s| !s.exists());
        let backup_taken = self.backup.as_ref().is_none_or(|b| b.exists());

        if staged_went_live && backup_taken && self.live.exists() {
            fs::remove_dir_all(&self.live)?;
        }
        if let Some(backup) = &self.backup
            && backup.exists()
        {
            unpack::move_dir(backup, &self.live)?;
        }
        debug!("Undid swap of {}", self.package);
        Ok(())
    }
}

/// Remove a transaction's journal and scratch area
/// Backoff before retry `attempt` (1-based): `base`, doubling, capped at [`MAX_BACKOFF`]
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// `base/name`, refusing names that would land anywhere but directly under `base`
fn package_dir(base: &Path, name: &str) -> Result<PathBuf> {
    check_path_safe_name(name)?;
    let dir = base.join(name);
    if dir.parent() != Some(base) {
        return Err(Error::InvalidConstraint(format!(
            "package '{}' does not map to a directory under {}",
            name,
            base.display()
        )));
    }
    Ok(dir)
}

pub(crate) fn discard_scratch(config: &InstallerConfig, changeset_id: &str) -> Result<()> {
    let work_dir = config.work_dir(changeset_id);
    if work_dir.exists() {
        fs::remove_dir_all(&work_dir)?;
    }
    let journal = config.journal_dir.join(TransactionJournal::file_name(changeset_id));
    if journal.exists() {
        fs::remove_file(journal)?;
    }
    Ok(())
}

/// Applies ChangeSets against a store and an install root
pub struct Installer<'a> {
    store: &'a LocalStore,
    fetcher: &'a dyn ArtifactFetcher,
    verifier: &'a dyn IntegrityVerifier,
    unpacker: &'a dyn ArtifactUnpacker,
    config: InstallerConfig,
    options: InstallOptions,
}

impl<'a> Installer<'a> {
    pub fn new(
        store: &'a LocalStore,
        fetcher: &'a dyn ArtifactFetcher,
        verifier: &'a dyn IntegrityVerifier,
        unpacker: &'a dyn ArtifactUnpacker,
        config: InstallerConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            verifier,
            unpacker,
            config,
            options: InstallOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Roll back any transactions interrupted in earlier runs
    pub fn recover(&self) -> Result<Vec<RecoveryOutcome>> {
        let mut txn = self.store.begin_transaction()?;
        let outcomes = recovery::recover_all(&self.config, &mut txn)?;
        txn.abort()?;
        Ok(outcomes)
    }

    /// Apply a ChangeSet
    ///
    /// Returns `Done` when the store and install root reflect the ChangeSet,
    /// including when an earlier run already committed it. Failures that
    /// left nothing changed come back as `RolledBack`. Lock failures, stale
    /// plans and failed rollbacks are errors.
    pub fn apply(&self, changeset: &ChangeSet) -> Result<ApplyOutcome> {
        let start = Instant::now();
        let mut txn = self.store.begin_transaction()?;

        if !recovery::recover_all(&self.config, &mut txn)?.is_empty() {
            // Snapshot predates the recovery's restore
            txn.abort()?;
            txn = self.store.begin_transaction()?;
        }
        let snapshot = txn.snapshot().clone();

        if snapshot.last_changeset.as_deref() == Some(changeset.id.as_str()) {
            info!("Changeset {} already applied", changeset.id);
            return Ok(ApplyOutcome::Done(ApplyReport::new(
                changeset,
                snapshot.generation,
                true,
                start,
            )));
        }

        if snapshot.generation != changeset.base_generation {
            return Err(Error::StaleChangeSet {
                id: changeset.id.clone(),
                planned: changeset.base_generation,
                current: snapshot.generation,
            });
        }

        let names = changeset
            .operations
            .iter()
            .map(|op| op.name())
            .chain(changeset.target.keys().map(String::as_str));
        for name in names {
            if let Err(reason) = check_path_safe_name(name) {
                warn!("Changeset {} refused: {}", changeset.id, reason);
                return Ok(ApplyOutcome::RolledBack {
                    stage: InstallStage::Resolved,
                    reason,
                });
            }
        }

        info!(
            "Applying changeset {} ({}): {} operation(s)",
            changeset.id,
            changeset.description,
            changeset.len()
        );

        let work_dir = self.config.work_dir(&changeset.id);
        for sub in [FETCH_DIR, STAGE_DIR, BACKUP_DIR] {
            fs::create_dir_all(work_dir.join(sub))?;
        }

        let mut journal = TransactionJournal::create(&self.config.journal_dir, &changeset.id)?;
        let prepared = journal
            .write_barrier(&JournalRecord::Begin {
                changeset_id: changeset.id.clone(),
                description: changeset.description.clone(),
                base_generation: changeset.base_generation,
                timestamp: Utc::now(),
            })
            .map_err(|e| (InstallStage::Resolved, e))
            .and_then(|()| {
                journal
                    .write(&JournalRecord::Planned {
                        operations: changeset.operations.clone(),
                    })
                    .map_err(|e| (InstallStage::Resolved, e))
            })
            .and_then(|()| self.prepare(changeset, &work_dir, &mut journal));

        if let Err((stage, reason)) = prepared {
            warn!("Changeset {} failed while {}: {}", changeset.id, stage, reason);
            drop(journal);
            discard_scratch(&self.config, &changeset.id)?;
            if let Some(progress) = &self.options.progress {
                progress.finish_with_error(&reason.to_string());
            }
            return Ok(ApplyOutcome::RolledBack { stage, reason });
        }

        // Committing: cancellation is no longer honored past this point
        if let Err(reason) = journal.write_barrier(&JournalRecord::CommitIntent {
            snapshot: snapshot.clone(),
        }) {
            drop(journal);
            discard_scratch(&self.config, &changeset.id)?;
            return Ok(ApplyOutcome::RolledBack {
                stage: InstallStage::Committing,
                reason,
            });
        }

        let generation = match txn.commit(changeset) {
            Ok(CommitOutcome::Applied { generation }) => generation,
            Ok(CommitOutcome::AlreadyApplied) => snapshot.generation,
            Err(e @ Error::StaleChangeSet { .. }) => {
                drop(journal);
                discard_scratch(&self.config, &changeset.id)?;
                return Err(e);
            }
            Err(reason) => {
                warn!("Store commit for {} failed: {}", changeset.id, reason);
                drop(journal);
                discard_scratch(&self.config, &changeset.id)?;
                return Ok(ApplyOutcome::RolledBack {
                    stage: InstallStage::Committing,
                    reason,
                });
            }
        };

        let mut swaps = Vec::new();
        let swapped = journal
            .write_barrier(&JournalRecord::StoreCommitted { generation })
            .and_then(|()| self.swap_all(changeset, &work_dir, &mut journal, &mut swaps));

        if let Err(reason) = swapped {
            warn!(
                "Changeset {} failed after store commit, rolling back: {}",
                changeset.id, reason
            );
            self.undo_commit(&mut txn, &swaps, &reason)?;
            drop(journal);
            discard_scratch(&self.config, &changeset.id)?;
            return Ok(ApplyOutcome::RolledBack {
                stage: InstallStage::Committing,
                reason,
            });
        }

        let report = ApplyReport::new(changeset, generation, false, start);
        journal.write_barrier(&JournalRecord::Done {
            duration_ms: report.duration_ms,
        })?;
        journal.archive()?;
        if let Err(e) = fs::remove_dir_all(&work_dir) {
            warn!("Failed to clean up {}: {}", work_dir.display(), e);
        }
        txn.abort()?;

        if let Some(progress) = &self.options.progress {
            progress.finish_with_message("done");
        }
        info!(
            "Changeset {} done: {} installed, {} upgraded, {} removed (generation {})",
            changeset.id, report.installed, report.upgraded, report.removed, generation
        );
        Ok(ApplyOutcome::Done(report))
    }

    /// Fetch, verify and stage; nothing outside scratch is touched
    fn prepare(
        &self,
        changeset: &ChangeSet,
        work_dir: &Path,
        journal: &mut TransactionJournal,
    ) -> std::result::Result<(), (InstallStage, Error)> {
        let at = |stage: InstallStage| move |e: Error| (stage, e);

        let fetched = self
            .fetch_all(changeset, &work_dir.join(FETCH_DIR))
            .map_err(at(InstallStage::Fetching))?;
        journal
            .write_barrier(&JournalRecord::Fetched {
                count: fetched.len(),
                total_bytes: fetched.iter().map(|a| a.bytes).sum(),
            })
            .map_err(at(InstallStage::Fetching))?;

        self.verify_all(&fetched).map_err(at(InstallStage::Verifying))?;
        journal
            .write_barrier(&JournalRecord::Verified {
                count: fetched.len(),
            })
            .map_err(at(InstallStage::Verifying))?;

        self.stage_all(&fetched, &work_dir.join(STAGE_DIR))
            .map_err(at(InstallStage::Staging))?;
        journal
            .write_barrier(&JournalRecord::Staged {
                count: fetched.len(),
            })
            .map_err(at(InstallStage::Staging))?;

        Ok(())
    }

    fn fetch_all(&self, changeset: &ChangeSet, fetch_dir: &Path) -> Result<Vec<FetchedArtifact>> {
        let wanted: Vec<(&str, &Version, Option<&str>)> = changeset
            .operations
            .iter()
            .filter_map(|op| op.new_version().map(|v| (op.name(), v, op.digest())))
            .collect();

        if let Some(progress) = &self.options.progress {
            progress.set_length(wanted.len() as u64);
            progress.set_message("fetching");
        }
        info!(
            "Fetching {} artifact(s) with {} worker(s)",
            wanted.len(),
            self.config.workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build fetch pool: {}", e)))?;

        pool.install(|| {
            wanted
                .par_iter()
                .map(|(name, version, digest)| self.fetch_one(name, version, *digest, fetch_dir))
                .collect::<Result<Vec<_>>>()
        })
    }

    /// Fetch one artifact, retrying network failures with exponential backoff
    fn fetch_one(
        &self,
        name: &str,
        version: &Version,
        digest: Option<&str>,
        fetch_dir: &Path,
    ) -> Result<FetchedArtifact> {
        let path = fetch_dir.join(format!("{}-{}.artifact", name, version));
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.options
                .check_cancelled(&format!("fetch of {} {}", name, version))?;

            match self.download(name, version, &path) {
                Ok(bytes) => {
                    debug!("Fetched {} {} ({} bytes)", name, version, bytes);
                    if let Some(progress) = &self.options.progress {
                        progress.increment(1);
                    }
                    return Ok(FetchedArtifact {
                        name: name.to_string(),
                        version: version.clone(),
                        path,
                        bytes,
                        digest: digest.map(str::to_string),
                    });
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = retry_delay(self.config.backoff, attempt);
                    warn!(
                        "Fetch of {} {} failed (attempt {}/{}): {}, retrying in {:?}",
                        name, version, attempt, self.config.max_attempts, e, delay
                    );
                    self.wait(delay, &format!("fetch of {} {}", name, version))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sleep for `delay`, waking every [`CANCEL_POLL`] to honor cancellation
    fn wait(&self, delay: Duration, operation: &str) -> Result<()> {
        let deadline = Instant::now() + delay;
        loop {
            self.options.check_cancelled(operation)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }

    fn download(&self, name: &str, version: &Version, dest: &Path) -> Result<u64> {
        let mut reader = self.fetcher.fetch_artifact(name, version)?;
        let mut file = File::create(dest)?;
        let bytes = io::copy(&mut reader, &mut file).map_err(|e| {
            Error::Network(format!("Download of {} {} interrupted: {}", name, version, e))
        })?;
        file.sync_all()?;
        Ok(bytes)
    }

    fn verify_all(&self, fetched: &[FetchedArtifact]) -> Result<()> {
        for artifact in fetched {
            self.options
                .check_cancelled(&format!("verify of {}", artifact.name))?;

            match &artifact.digest {
                Some(expected) => {
                    let mut file = File::open(&artifact.path)?;
                    if !self.verifier.verify(&mut file, expected)? {
                        return Err(Error::Integrity(format!(
                            "{} {}: digest does not match {}",
                            artifact.name, artifact.version, expected
                        )));
                    }
                    debug!("Digest verified for {} {}", artifact.name, artifact.version);
                }
                None if self.config.require_digest => {
                    return Err(Error::Integrity(format!(
                        "{} {}: registry published no digest",
                        artifact.name, artifact.version
                    )));
                }
                None => warn!(
                    "No digest published for {} {}, skipping integrity check",
                    artifact.name, artifact.version
                ),
            }
        }
        Ok(())
    }

    fn stage_all(&self, fetched: &[FetchedArtifact], stage_dir: &Path) -> Result<()> {
        for artifact in fetched {
            self.options
                .check_cancelled(&format!("staging of {}", artifact.name))?;

            let dest = package_dir(stage_dir, &artifact.name)?;
            fs::create_dir_all(&dest)?;
            self.unpacker.unpack(&artifact.path, &dest)?;
            debug!("Staged {} {} in {}", artifact.name, artifact.version, dest.display());
        }
        Ok(())
    }

    /// Make staged content visible, in ChangeSet order
    fn swap_all(
        &self,
        changeset: &ChangeSet,
        work_dir: &Path,
        journal: &mut TransactionJournal,
        done: &mut Vec<Swap>,
    ) -> Result<()> {
        fs::create_dir_all(&self.config.install_root)?;

        for op in &changeset.operations {
            let live = package_dir(&self.config.install_root, op.name())?;
            let swap = Swap {
                package: op.name().to_string(),
                backup: live
                    .exists()
                    .then(|| work_dir.join(BACKUP_DIR).join(op.name())),
                staged: op
                    .needs_artifact()
                    .then(|| work_dir.join(STAGE_DIR).join(op.name())),
                live,
            };

            journal.write_barrier(&swap.record())?;
            done.push(swap.clone());
            swap.perform()?;
            debug!("Swapped {}", op);
        }
        Ok(())
    }

    /// Undo swaps newest first, then rewrite the snapshot
    fn undo_commit(&self, txn: &mut StoreTransaction, swaps: &[Swap], cause: &Error) -> Result<()> {
        let mut failures = Vec::new();
        for swap in swaps.iter().rev() {
            if let Err(e) = swap.undo() {
                failures.push(format!("{}: {}", swap.package, e));
            }
        }
        if let Err(e) = txn.restore() {
            failures.push(format!("store: {}", e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::RollbackFailed(format!(
                "{} (while rolling back after: {})",
                failures.join("; "),
                cause
            )))
        }
    }
}
