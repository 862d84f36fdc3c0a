// tests/install.rs

//! End-to-end apply, rollback and removal through the package manager

mod common;

use common::{
    FlakyRegistry, VanishingUnpacker, add_package, installed_file, scenario_a_registry,
    test_config, test_manager,
};
use llamapkg::manager::{PackageManager, parse_requests};
use llamapkg::planner::UpdateTarget;
use llamapkg::registry::MemoryRegistry;
use llamapkg::transaction::{ApplyOutcome, InstallStage, Operation};
use llamapkg::version::{Constraint, Version};
use llamapkg::Error;
use tempfile::TempDir;

fn install(manager: &PackageManager, specs: &[&str]) -> ApplyOutcome {
    let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
    let changeset = manager
        .plan_install(&parse_requests(&specs).unwrap())
        .unwrap();
    manager.apply(&changeset).unwrap()
}

#[test]
fn test_install_unpacks_and_records() {
    let temp = TempDir::new().unwrap();
    let manager = test_manager(&temp, scenario_a_registry());

    let outcome = install(&manager, &["app@>=1.0.0, <2.0.0"]);
    let ApplyOutcome::Done(report) = outcome else {
        panic!("expected done, got {outcome:?}");
    };
    assert_eq!(report.installed, 2);
    assert_eq!(report.generation, 1);

    assert_eq!(installed_file(&temp, "app", "VERSION").as_deref(), Some("1.2.0"));
    assert_eq!(installed_file(&temp, "lib", "lib.txt").as_deref(), Some("lib 1.4.2\n"));

    let state = manager.current_state().unwrap();
    let app = state.get("app").unwrap();
    assert!(app.root);
    assert_eq!(app.requested, Some(Constraint::parse(">=1.0.0, <2.0.0").unwrap()));
    let lib = state.get("lib").unwrap();
    assert!(!lib.root);
    assert!(lib.required_by.contains("app"));
    assert!(lib.digest.is_some());
    assert!(manager.verify().unwrap().is_empty());
}

#[test]
fn test_apply_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let manager = test_manager(&temp, scenario_a_registry());
    let changeset = manager
        .plan_install(&parse_requests(&["app".to_string()]).unwrap())
        .unwrap();

    let first = manager.apply(&changeset).unwrap().into_result().unwrap();
    assert!(!first.already_applied);
    let after_first = manager.current_state().unwrap();

    let second = manager.apply(&changeset).unwrap().into_result().unwrap();
    assert!(second.already_applied);
    assert_eq!(second.generation, first.generation);
    assert_eq!(manager.current_state().unwrap(), after_first);
}

#[test]
fn test_stale_changeset_rejected() {
    let temp = TempDir::new().unwrap();
    let manager = test_manager(&temp, scenario_a_registry());

    let app = manager
        .plan_install(&parse_requests(&["app".to_string()]).unwrap())
        .unwrap();
    let lib = manager
        .plan_install(&parse_requests(&["lib@^1.0".to_string()]).unwrap())
        .unwrap();
    assert!(manager.apply(&lib).unwrap().is_done());

    let err = manager.apply(&app).unwrap_err();
    assert!(matches!(err, Error::StaleChangeSet { planned: 0, current: 1, .. }));
}

#[test]
fn test_scenario_c_remove_collects_dependency() {
    let temp = TempDir::new().unwrap();
    let registry = MemoryRegistry::new();
    add_package(&registry, "a", "1.0.0", &[("b", "^1.0")]);
    add_package(&registry, "b", "1.0.0", &[]);
    let manager = test_manager(&temp, registry);
    assert!(install(&manager, &["a"]).is_done());

    let changeset = manager.plan_remove(&["a".to_string()]).unwrap();
    assert_eq!(
        changeset.operations,
        vec![
            Operation::Remove {
                name: "a".into(),
                version: Version::new(1, 0, 0),
            },
            Operation::Remove {
                name: "b".into(),
                version: Version::new(1, 0, 0),
            },
        ]
    );

    let report = manager.apply(&changeset).unwrap().into_result().unwrap();
    assert_eq!(report.removed, 2);
    assert!(manager.current_state().unwrap().is_empty());
    assert!(!temp.path().join("root/a").exists());
    assert!(!temp.path().join("root/b").exists());
}

#[test]
fn test_scenario_d_network_failures_roll_back() {
    let temp = TempDir::new().unwrap();
    let registry = MemoryRegistry::new();
    add_package(&registry, "x", "1.0.0", &[]);
    let manager = test_manager(&temp, FlakyRegistry::new(registry).fail("x", 3));
    let before = manager.current_state().unwrap();

    let outcome = install(&manager, &["x"]);
    let ApplyOutcome::RolledBack { stage, reason } = outcome else {
        panic!("expected rollback, got {outcome:?}");
    };
    assert_eq!(stage, InstallStage::Fetching);
    assert!(matches!(reason, Error::Network(_)));
    assert_eq!(manager.current_state().unwrap(), before);
    assert!(!temp.path().join("root/x").exists());
}

#[test]
fn test_transient_network_failure_retried() {
    let temp = TempDir::new().unwrap();
    let registry = MemoryRegistry::new();
    add_package(&registry, "x", "1.0.0", &[]);
    let manager = test_manager(&temp, FlakyRegistry::new(registry).fail("x", 2));

    assert!(install(&manager, &["x"]).is_done());
    assert_eq!(installed_file(&temp, "x", "VERSION").as_deref(), Some("1.0.0"));
}

#[test]
fn test_integrity_failure_is_not_retried() {
    let temp = TempDir::new().unwrap();
    let registry = scenario_a_registry();
    registry
        .set_digest("lib", "1.4.2", Some("00".repeat(32)))
        .unwrap();
    let manager = test_manager(&temp, registry);

    let outcome = install(&manager, &["app"]);
    let ApplyOutcome::RolledBack { stage, reason } = outcome else {
        panic!("expected rollback, got {outcome:?}");
    };
    assert_eq!(stage, InstallStage::Verifying);
    assert!(matches!(reason, Error::Integrity(_)));
    assert!(manager.current_state().unwrap().is_empty());
    assert!(!temp.path().join("root/app").exists());
}

#[test]
fn test_swap_failure_restores_snapshot() {
    let temp = TempDir::new().unwrap();
    let registry = scenario_a_registry();
    add_package(&registry, "app", "1.3.0", &[("lib", "^1.5")]);

    let manager = test_manager(&temp, scenario_a_registry());
    assert!(install(&manager, &["app@<1.3"]).is_done());
    let before = manager.current_state().unwrap();
    drop(manager);

    // Upgrade app and lib; app's staged directory disappears before its swap
    let manager = PackageManager::with_registry(test_config(&temp), Box::new(registry))
        .unwrap()
        .with_unpacker(Box::new(VanishingUnpacker {
            victim: "app".to_string(),
        }));
    let changeset = manager
        .plan_install(&parse_requests(&["app@^1.3".to_string()]).unwrap())
        .unwrap();
    assert_eq!(changeset.len(), 2);

    let outcome = manager.apply(&changeset).unwrap();
    let ApplyOutcome::RolledBack { stage, .. } = outcome else {
        panic!("expected rollback, got {outcome:?}");
    };
    assert_eq!(stage, InstallStage::Committing);
    assert_eq!(manager.current_state().unwrap(), before);
    assert_eq!(installed_file(&temp, "lib", "VERSION").as_deref(), Some("1.4.2"));
    assert_eq!(installed_file(&temp, "app", "VERSION").as_deref(), Some("1.2.0"));
    assert!(manager.verify().unwrap().is_empty());
}

#[test]
fn test_update_single_package_subtree() {
    let temp = TempDir::new().unwrap();
    let registry = scenario_a_registry();
    add_package(&registry, "tool", "1.0.0", &[("lib", ">=1.0")]);
    let manager = test_manager(&temp, registry);

    assert!(install(&manager, &["app@=1.0.0", "tool"]).is_done());
    let state = manager.current_state().unwrap();
    assert_eq!(state.get("lib").unwrap().version, Version::new(1, 4, 2));

    let changeset = manager
        .plan_update(&UpdateTarget::Package("tool".to_string()), None)
        .unwrap();
    assert!(changeset.is_empty());

    let err = manager
        .plan_update(
            &UpdateTarget::Package("tool".to_string()),
            Some(Constraint::parse(">=2.0").unwrap()),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn test_dependency_name_cannot_escape_install_root() {
    let temp = TempDir::new().unwrap();
    let registry = MemoryRegistry::new();
    add_package(&registry, "app", "1.0.0", &[("../escape", "^1.0.0")]);
    add_package(&registry, "../escape", "1.0.0", &[]);
    let manager = test_manager(&temp, registry);

    let err = manager
        .plan_install(&parse_requests(&["app".to_string()]).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConstraint(ref msg) if msg.contains("../escape")));

    assert!(!temp.path().join("escape").exists());
    assert!(installed_file(&temp, "app", "VERSION").is_none());
    assert!(manager.current_state().unwrap().is_empty());
}
