// tests/recovery.rs

//! Crash recovery from journals left by interrupted runs

mod common;

use chrono::Utc;
use common::{installed_file, scenario_a_registry, test_config, test_manager};
use llamapkg::manager::parse_requests;
use llamapkg::transaction::{
    ChangeSet, JournalRecord, RecoveryOutcome, TransactionJournal, find_incomplete_journals,
};
use std::fs;
use tempfile::TempDir;

fn begin(changeset: &ChangeSet) -> JournalRecord {
    JournalRecord::Begin {
        changeset_id: changeset.id.clone(),
        description: changeset.description.clone(),
        base_generation: changeset.base_generation,
        timestamp: Utc::now(),
    }
}

#[test]
fn test_recover_after_store_commit() {
    let temp = TempDir::new().unwrap();
    let manager = test_manager(&temp, scenario_a_registry());
    let install = manager
        .plan_install(&parse_requests(&["app".to_string()]).unwrap())
        .unwrap();
    assert!(manager.apply(&install).unwrap().is_done());
    let before = manager.current_state().unwrap();

    // Replay a removal by hand and stop right after the first swap
    let removal = manager.plan_remove(&["app".to_string()]).unwrap();
    let installer = test_config(&temp).installer_config();
    let live = installer.install_root.join("app");
    let backup = installer.work_dir(&removal.id).join("backup/app");

    let mut journal = TransactionJournal::create(&installer.journal_dir, &removal.id).unwrap();
    journal.write_barrier(&begin(&removal)).unwrap();
    journal
        .write_barrier(&JournalRecord::CommitIntent {
            snapshot: before.clone(),
        })
        .unwrap();
    {
        let mut txn = manager.store().begin_transaction().unwrap();
        txn.commit(&removal).unwrap();
    }
    journal
        .write_barrier(&JournalRecord::Swap {
            package: "app".into(),
            live: live.clone(),
            backup: Some(backup.clone()),
            staged: None,
        })
        .unwrap();
    fs::create_dir_all(backup.parent().unwrap()).unwrap();
    fs::rename(&live, &backup).unwrap();
    drop(journal);

    assert_eq!(manager.current_state().unwrap().generation, before.generation + 1);
    assert!(!live.exists());

    let outcomes = manager.recover().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        &outcomes[0],
        RecoveryOutcome::RolledBack { tx_uuid, reason }
            if tx_uuid == &removal.id && reason.contains("restored")
    ));

    assert_eq!(manager.current_state().unwrap(), before);
    assert_eq!(installed_file(&temp, "app", "VERSION").as_deref(), Some("1.2.0"));
    assert!(!installer.work_dir(&removal.id).exists());
    assert!(find_incomplete_journals(&installer.journal_dir).unwrap().is_empty());
    assert!(manager.verify().unwrap().is_empty());
}

#[test]
fn test_apply_recovers_interrupted_fetch_first() {
    let temp = TempDir::new().unwrap();
    let manager = test_manager(&temp, scenario_a_registry());
    let installer = test_config(&temp).installer_config();

    let abandoned = manager
        .plan_install(&parse_requests(&["lib".to_string()]).unwrap())
        .unwrap();
    fs::create_dir_all(installer.work_dir(&abandoned.id).join("fetch")).unwrap();
    let mut journal = TransactionJournal::create(&installer.journal_dir, &abandoned.id).unwrap();
    journal.write_barrier(&begin(&abandoned)).unwrap();
    journal
        .write_barrier(&JournalRecord::Fetched {
            count: 1,
            total_bytes: 10,
        })
        .unwrap();
    drop(journal);

    let changeset = manager
        .plan_install(&parse_requests(&["app".to_string()]).unwrap())
        .unwrap();
    assert!(manager.apply(&changeset).unwrap().is_done());

    assert!(!installer.work_dir(&abandoned.id).exists());
    assert!(find_incomplete_journals(&installer.journal_dir).unwrap().is_empty());
    assert!(manager.current_state().unwrap().contains("app"));
}

#[test]
fn test_recover_with_nothing_pending() {
    let temp = TempDir::new().unwrap();
    let manager = test_manager(&temp, scenario_a_registry());
    assert!(manager.recover().unwrap().is_empty());
}
