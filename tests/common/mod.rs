// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use llamapkg::config::Config;
use llamapkg::manager::PackageManager;
use llamapkg::registry::{
    ArtifactFetcher, AuthToken, MemoryRegistry, PackageSource, PackageSpec, PublishManifest,
    Registry, SearchHit,
};
use llamapkg::transaction::ArtifactUnpacker;
use llamapkg::version::Version;
use llamapkg::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Build a gzipped tarball from `(path, contents)` pairs
pub fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

/// Add a version with a tarball holding `VERSION` and `<name>.txt`
pub fn add_package(registry: &MemoryRegistry, name: &str, version: &str, deps: &[(&str, &str)]) {
    registry.add(name, version, deps).unwrap();
    let text = format!("{} {}\n", name, version);
    let artifact = tarball(&[
        ("VERSION", version.as_bytes()),
        (format!("{}.txt", name).as_str(), text.as_bytes()),
    ]);
    registry.set_artifact(name, version, artifact).unwrap();
}

/// app 1.0.0 / 1.2.0 over lib 1.0.0 .. 1.5.0
pub fn scenario_a_registry() -> MemoryRegistry {
    let registry = MemoryRegistry::new();
    add_package(&registry, "app", "1.0.0", &[("lib", ">=1.0, <1.5")]);
    add_package(&registry, "app", "1.2.0", &[("lib", ">=1.3, <1.5")]);
    for version in ["1.0.0", "1.3.0", "1.4.0", "1.4.2", "1.5.0"] {
        add_package(&registry, "lib", version, &[]);
    }
    registry
}

/// Config rooted in a temp dir with near-instant retry backoff
pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config {
        state_dir: temp.path().join("state"),
        install_root: Some(temp.path().join("root")),
        ..Config::default()
    };
    config.fetch.backoff_ms = 1;
    config
}

pub fn test_manager(temp: &TempDir, registry: impl Registry + 'static) -> PackageManager {
    PackageManager::with_registry(test_config(temp), Box::new(registry)).unwrap()
}

/// Read a file from an installed package directory
pub fn installed_file(temp: &TempDir, package: &str, file: &str) -> Option<String> {
    fs::read_to_string(temp.path().join("root").join(package).join(file)).ok()
}

/// Registry wrapper whose artifact fetches fail with `Network` on demand
pub struct FlakyRegistry {
    inner: MemoryRegistry,
    failures: Mutex<BTreeMap<String, usize>>,
    attempts: AtomicUsize,
}

impl FlakyRegistry {
    pub fn new(inner: MemoryRegistry) -> Self {
        Self {
            inner,
            failures: Mutex::new(BTreeMap::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` fetches of `name`
    pub fn fail(self, name: &str, count: usize) -> Self {
        self.failures.lock().unwrap().insert(name.to_string(), count);
        self
    }

    /// Fetch calls seen so far, failed or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PackageSource for FlakyRegistry {
    fn get_package_spec(&self, name: &str) -> Result<PackageSpec> {
        self.inner.get_package_spec(name)
    }
}

impl ArtifactFetcher for FlakyRegistry {
    fn fetch_artifact(&self, name: &str, version: &Version) -> Result<Box<dyn Read + Send>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::Network(format!("connection reset fetching {}", name)));
        }
        drop(failures);
        self.inner.fetch_artifact(name, version)
    }
}

impl Registry for FlakyRegistry {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.inner.search(query)
    }

    fn publish(
        &self,
        manifest: &PublishManifest,
        artifact: &[u8],
        token: Option<&AuthToken>,
    ) -> Result<()> {
        self.inner.publish(manifest, artifact, token)
    }
}

/// Unpacker that loses the staging directory of one package
///
/// Staging succeeds, so the failure surfaces when that package's directory
/// swap runs after the store commit.
pub struct VanishingUnpacker {
    pub victim: String,
}

impl ArtifactUnpacker for VanishingUnpacker {
    fn unpack(&self, artifact: &Path, dest: &Path) -> Result<()> {
        if dest.file_name().is_some_and(|n| n == self.victim.as_str()) {
            fs::remove_dir_all(dest)?;
            return Ok(());
        }
        llamapkg::transaction::TarballUnpacker.unpack(artifact, dest)
    }
}
