// src/registry/memory.rs

//! In-process registry
//!
//! Holds package metadata and artifact bytes in memory. Useful for embedding
//! and for exercising the resolver and installer without a network.

use crate::error::{Error, Result};
use crate::hash::sha256;
use crate::version::{Constraint, Version};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::RwLock;

use super::{
    ArtifactFetcher, AuthToken, PackageSource, PackageSpec, PublishManifest, Registry, SearchHit,
    VersionEntry, apply_publish,
};

#[derive(Debug, Default)]
struct Inner {
    specs: BTreeMap<String, PackageSpec>,
    artifacts: BTreeMap<(String, Version), Vec<u8>>,
}

/// Registry backed by in-memory maps
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: RwLock<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Io(std::io::Error::other("memory registry lock poisoned")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Io(std::io::Error::other("memory registry lock poisoned")))
    }

    /// Add a version with required dependencies given as `(name, constraint)` text
    pub fn add(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> Result<()> {
        self.add_with_optional(name, version, deps, &[])
    }

    /// Add a version with required and optional dependencies
    pub fn add_with_optional(
        &self,
        name: &str,
        version: &str,
        deps: &[(&str, &str)],
        optional: &[(&str, &str)],
    ) -> Result<()> {
        let parse = |list: &[(&str, &str)]| -> Result<BTreeMap<String, Constraint>> {
            list.iter()
                .map(|(dep, constraint)| Ok((dep.to_string(), Constraint::parse(constraint)?)))
                .collect()
        };

        let entry = VersionEntry {
            dependencies: parse(deps)?,
            optional_dependencies: parse(optional)?,
            sha256: None,
            download_url: None,
        };
        self.insert_version(name, Version::parse(version)?, entry)
    }

    /// Insert or replace one version entry
    pub fn insert_version(&self, name: &str, version: Version, entry: VersionEntry) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .specs
            .entry(name.to_string())
            .or_insert_with(|| PackageSpec::new(name))
            .versions
            .insert(version, entry);
        Ok(())
    }

    /// Attach artifact bytes to an existing version and record their digest
    pub fn set_artifact(&self, name: &str, version: &str, bytes: Vec<u8>) -> Result<()> {
        let version = Version::parse(version)?;
        let mut inner = self.write()?;

        let entry = inner
            .specs
            .get_mut(name)
            .and_then(|spec| spec.versions.get_mut(&version))
            .ok_or_else(|| Error::NotFound(format!("{} {}", name, version)))?;
        entry.sha256 = Some(sha256(&bytes));

        inner.artifacts.insert((name.to_string(), version), bytes);
        Ok(())
    }

    /// Override the published digest of a version
    pub fn set_digest(&self, name: &str, version: &str, digest: Option<String>) -> Result<()> {
        let version = Version::parse(version)?;
        let mut inner = self.write()?;
        let entry = inner
            .specs
            .get_mut(name)
            .and_then(|spec| spec.versions.get_mut(&version))
            .ok_or_else(|| Error::NotFound(format!("{} {}", name, version)))?;
        entry.sha256 = digest;
        Ok(())
    }
}

impl PackageSource for MemoryRegistry {
    fn get_package_spec(&self, name: &str) -> Result<PackageSpec> {
        self.read()?
            .specs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("package {}", name)))
    }
}

impl ArtifactFetcher for MemoryRegistry {
    fn fetch_artifact(&self, name: &str, version: &Version) -> Result<Box<dyn Read + Send>> {
        let bytes = self
            .read()?
            .artifacts
            .get(&(name.to_string(), version.clone()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {} {}", name, version)))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

impl Registry for MemoryRegistry {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        Ok(self
            .read()?
            .specs
            .values()
            .filter(|spec| spec.matches_query(query))
            .map(SearchHit::from)
            .collect())
    }

    fn publish(
        &self,
        manifest: &PublishManifest,
        artifact: &[u8],
        _token: Option<&AuthToken>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let existing = inner.specs.get(&manifest.name).cloned();
        let spec = apply_publish(existing, manifest, sha256(artifact), None)?;

        inner.specs.insert(manifest.name.clone(), spec);
        inner.artifacts.insert(
            (manifest.name.clone(), manifest.version.clone()),
            artifact.to_vec(),
        );
        Ok(())
    }
}
