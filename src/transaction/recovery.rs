// src/transaction/recovery.rs

//! Transaction recovery for crash safety
//!
//! An incomplete journal (no `Done` record) means a run was interrupted.
//! Recovery always rolls back:
//!
//! - No `CommitIntent`: the store was never touched, so scratch and journal
//!   are discarded.
//! - `CommitIntent` present: directory swaps are undone newest first and, if
//!   the store record carries this ChangeSet's id, the snapshot saved in the
//!   journal is written back.
//!
//! The store record itself decides whether the commit happened, since a
//! crash can land between the rename and the `StoreCommitted` record.

use crate::error::{Error, Result};
use crate::store::StoreTransaction;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use super::journal::{JournalRecord, TransactionJournal, find_incomplete_journals};
use super::{InstallerConfig, Swap, discard_scratch};

/// Outcome of recovering a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Interrupted transaction undone
    RolledBack { tx_uuid: String, reason: String },
    /// Journal unreadable; left in place for manual inspection
    Corrupted { tx_uuid: String, error: String },
    /// Empty journal removed
    Clean { tx_uuid: String },
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RolledBack { tx_uuid, reason } => write!(f, "{}: rolled back ({})", tx_uuid, reason),
            Self::Corrupted { tx_uuid, error } => write!(f, "{}: corrupted journal ({})", tx_uuid, error),
            Self::Clean { tx_uuid } => write!(f, "{}: clean", tx_uuid),
        }
    }
}

/// Recover all incomplete transactions; the caller holds the store lock
pub fn recover_all(
    config: &InstallerConfig,
    txn: &mut StoreTransaction,
) -> Result<Vec<RecoveryOutcome>> {
    let mut outcomes = Vec::new();

    for journal_path in find_incomplete_journals(&config.journal_dir)? {
        let outcome = recover_single(config, journal_path, txn)?;
        info!("Recovery: {}", outcome);
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

fn recover_single(
    config: &InstallerConfig,
    journal_path: PathBuf,
    txn: &mut StoreTransaction,
) -> Result<RecoveryOutcome> {
    let journal = match TransactionJournal::open(journal_path.clone()) {
        Ok(j) => j,
        Err(e) => {
            return Ok(RecoveryOutcome::Corrupted {
                tx_uuid: journal_path.display().to_string(),
                error: format!("Failed to open journal: {}", e),
            });
        }
    };

    let tx_uuid = journal.tx_uuid().to_string();
    let records = match journal.read_all() {
        Ok(r) => r,
        Err(e) => {
            return Ok(RecoveryOutcome::Corrupted {
                tx_uuid,
                error: format!("Failed to read journal: {}", e),
            });
        }
    };

    if records.is_empty() {
        drop(journal);
        discard_scratch(config, &tx_uuid)?;
        return Ok(RecoveryOutcome::Clean { tx_uuid });
    }

    let stage = journal.last_stage()?;
    warn!("Recovering interrupted transaction {} (last stage: {})", tx_uuid, stage);

    let snapshot = records.iter().find_map(|r| match r {
        JournalRecord::CommitIntent { snapshot } => Some(snapshot.clone()),
        _ => None,
    });

    let Some(snapshot) = snapshot else {
        drop(journal);
        discard_scratch(config, &tx_uuid)?;
        return Ok(RecoveryOutcome::RolledBack {
            tx_uuid,
            reason: format!("interrupted before store commit (stage: {})", stage),
        });
    };

    let swaps: Vec<Swap> = records.iter().filter_map(Swap::from_record).collect();
    for swap in swaps.iter().rev() {
        swap.undo().map_err(|e| {
            Error::RollbackFailed(format!(
                "transaction {}: cannot restore {}: {}",
                tx_uuid,
                swap.live.display(),
                e
            ))
        })?;
    }

    let current = txn.current()?;
    let reason = if current.last_changeset.as_deref() == Some(tx_uuid.as_str()) {
        txn.restore_to(&snapshot).map_err(|e| {
            Error::RollbackFailed(format!(
                "transaction {}: cannot restore store snapshot: {}",
                tx_uuid, e
            ))
        })?;
        format!(
            "interrupted after store commit; generation {} restored",
            snapshot.generation
        )
    } else {
        "store commit was not durable".to_string()
    };

    drop(journal);
    discard_scratch(config, &tx_uuid)?;
    Ok(RecoveryOutcome::RolledBack { tx_uuid, reason })
}
