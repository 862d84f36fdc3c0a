// src/transaction/journal.rs

//! Append-only transaction journal for crash recovery
//!
//! Each record is written as a single line with a CRC32 checksum.
//!
//! Format: `{crc32_hex}|{json}\n`
//!
//! Phase barriers fsync before the installer moves on to a step that
//! touches the store or the install root.

use crate::error::{Error, Result};
use crate::store::StoreState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{InstallStage, Operation};

/// A record in the transaction journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Transaction started
    Begin {
        changeset_id: String,
        description: String,
        base_generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// Operations about to be applied
    Planned { operations: Vec<Operation> },

    /// All artifacts downloaded to scratch
    Fetched { count: usize, total_bytes: u64 },

    /// All artifacts passed the integrity check
    Verified { count: usize },

    /// Staged package contents ready to swap in
    Staged { count: usize },

    /// About to replace the store record; `snapshot` is the state being
    /// replaced
    CommitIntent { snapshot: StoreState },

    /// Store record replaced
    StoreCommitted { generation: u64 },

    /// Directory swap about to happen for one package
    ///
    /// `backup` is where the previous live directory is parked, if one
    /// existed. `staged` is the directory moving into place, absent for
    /// removals.
    Swap {
        package: String,
        live: PathBuf,
        backup: Option<PathBuf>,
        staged: Option<PathBuf>,
    },

    /// Transaction complete
    Done { duration_ms: u64 },
}

impl JournalRecord {
    /// Stage this record marks the transaction as having reached
    pub fn to_stage(&self) -> InstallStage {
        match self {
            Self::Begin { .. } | Self::Planned { .. } => InstallStage::Resolved,
            Self::Fetched { .. } => InstallStage::Fetching,
            Self::Verified { .. } => InstallStage::Verifying,
            Self::Staged { .. } => InstallStage::Staging,
            Self::CommitIntent { .. } | Self::StoreCommitted { .. } | Self::Swap { .. } => {
                InstallStage::Committing
            }
            Self::Done { .. } => InstallStage::Done,
        }
    }

    /// Check if this is a phase barrier record
    pub fn is_barrier(&self) -> bool {
        !matches!(self, Self::Planned { .. })
    }
}

/// Append-only transaction journal with fsync barriers
pub struct TransactionJournal {
    path: PathBuf,
    file: File,
    tx_uuid: String,
}

impl TransactionJournal {
    /// Journal file name for a ChangeSet id
    pub fn file_name(tx_uuid: &str) -> String {
        format!("tx-{}.journal", tx_uuid)
    }

    /// Create a new journal for a transaction
    pub fn create(journal_dir: &Path, tx_uuid: &str) -> Result<Self> {
        fs::create_dir_all(journal_dir)?;

        let path = journal_dir.join(Self::file_name(tx_uuid));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            path,
            file,
            tx_uuid: tx_uuid.to_string(),
        })
    }

    /// Open an existing journal for recovery
    pub fn open(path: PathBuf) -> Result<Self> {
        let tx_uuid = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("tx-"))
            .ok_or_else(|| {
                Error::StoreCorruption(format!("Invalid journal filename: {}", path.display()))
            })?
            .to_string();

        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            path,
            file,
            tx_uuid,
        })
    }

    pub fn tx_uuid(&self) -> &str {
        &self.tx_uuid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a record to the journal (does NOT fsync)
    pub fn write(&mut self, record: &JournalRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        Ok(())
    }

    /// Write a record and fsync (for phase barriers)
    pub fn write_barrier(&mut self, record: &JournalRecord) -> Result<()> {
        self.write(record)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Read all valid records, stopping at the first damaged line
    ///
    /// A torn final line is expected after a crash, so damage ends the
    /// readable prefix rather than failing the read.
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.is_empty() {
                continue;
            }

            let Some((crc_text, json)) = line.split_once('|') else {
                warn!("Malformed journal line {}: missing delimiter", line_num + 1);
                break;
            };

            let Ok(expected_crc) = u32::from_str_radix(crc_text, 16) else {
                warn!("Invalid CRC32 at journal line {}: {}", line_num + 1, crc_text);
                break;
            };

            let actual_crc = crc32fast::hash(json.as_bytes());
            if expected_crc != actual_crc {
                warn!(
                    "CRC mismatch at journal line {}: expected {:08x}, got {:08x}",
                    line_num + 1,
                    expected_crc,
                    actual_crc
                );
                break;
            }

            let record: JournalRecord = serde_json::from_str(json).map_err(|e| {
                Error::StoreCorruption(format!(
                    "Failed to parse journal record at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            records.push(record);
        }

        Ok(records)
    }

    /// Last phase barrier reached
    pub fn last_stage(&self) -> Result<InstallStage> {
        let records = self.read_all()?;
        Ok(records
            .iter()
            .rev()
            .find(|r| r.is_barrier())
            .map_or(InstallStage::Resolved, JournalRecord::to_stage))
    }

    /// Archive the journal after successful completion
    pub fn archive(self) -> Result<()> {
        let archive_dir = self
            .path
            .parent()
            .unwrap_or(Path::new("."))
            .join("archive");
        fs::create_dir_all(&archive_dir)?;

        fs::rename(&self.path, archive_dir.join(Self::file_name(&self.tx_uuid)))?;
        Ok(())
    }

    /// Delete the journal (for rolled back transactions)
    pub fn delete(self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Find transaction journals without a Done record
pub fn find_incomplete_journals(journal_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut journals = Vec::new();

    if !journal_dir.exists() {
        return Ok(journals);
    }

    for entry in fs::read_dir(journal_dir)? {
        let path = entry?.path();

        // Only look at .journal files (not in archive subdirectory)
        if path.is_file()
            && path.extension().is_some_and(|e| e == "journal")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("tx-"))
        {
            let journal = TransactionJournal::open(path.clone())?;
            let has_done = journal
                .read_all()?
                .iter()
                .any(|r| matches!(r, JournalRecord::Done { .. }));

            if !has_done {
                journals.push(path);
            }
        }
    }

    journals.sort();
    Ok(journals)
}
