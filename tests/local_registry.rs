// tests/local_registry.rs

//! Publishing to a directory registry and installing from it

mod common;

use common::{installed_file, tarball, test_config};
use llamapkg::manager::{PackageManager, parse_requests};
use llamapkg::registry::PublishManifest;
use llamapkg::Error;
use tempfile::TempDir;

fn manifest(text: &str) -> PublishManifest {
    PublishManifest::from_toml(text).unwrap()
}

fn open(temp: &TempDir, index: &TempDir) -> PackageManager {
    let mut config = test_config(temp);
    config.registry_url = format!("file://{}", index.path().display());
    PackageManager::open(config, None).unwrap()
}

#[test]
fn test_publish_search_install() {
    let temp = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let manager = open(&temp, &index);

    manager
        .publish(
            &manifest(
                r#"
                name = "json-core"
                version = "0.3.1"
                description = "JSON primitives"
                keywords = ["json"]
                "#,
            ),
            &tarball(&[("VERSION", "0.3.1".as_bytes())]),
        )
        .unwrap();
    manager
        .publish(
            &manifest(
                r#"
                name = "json-cli"
                version = "1.0.0"
                description = "Command-line JSON tool"

                [dependencies]
                json-core = "^0.3"
                "#,
            ),
            &tarball(&[("VERSION", "1.0.0".as_bytes()), ("bin/json", "#!/bin/sh\n".as_bytes())]),
        )
        .unwrap();

    let hits = manager.search("json").unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["json-cli", "json-core"]);

    let changeset = manager
        .plan_install(&parse_requests(&["json-cli".to_string()]).unwrap())
        .unwrap();
    assert!(manager.apply(&changeset).unwrap().is_done());

    assert_eq!(installed_file(&temp, "json-core", "VERSION").as_deref(), Some("0.3.1"));
    assert!(temp.path().join("root/json-cli/bin/json").exists());
    assert_eq!(
        manager.current_state().unwrap().why("json-core"),
        Some((false, vec!["json-cli".to_string()]))
    );
}

#[test]
fn test_publish_rejects_duplicate_version() {
    let temp = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let manager = open(&temp, &index);
    let m = manifest("name = \"tool\"\nversion = \"1.0.0\"\n");

    manager.publish(&m, &tarball(&[("VERSION", "1.0.0".as_bytes())])).unwrap();
    let err = manager
        .publish(&m, &tarball(&[("VERSION", "1.0.0".as_bytes())]))
        .unwrap_err();
    assert!(matches!(err, Error::Publish(_)));
}

#[test]
fn test_missing_package_is_not_found() {
    let temp = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let manager = open(&temp, &index);

    let err = manager
        .plan_install(&parse_requests(&["nothing-here".to_string()]).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
