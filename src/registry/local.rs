// src/registry/local.rs

//! Directory-backed registry
//!
//! Layout:
//!
//! ```text
//! <root>/index.json                               name -> package document
//! <root>/<name>/<version>/<name>-<version>.tar.gz artifact
//! ```
//!
//! Selected by `file://` registry URLs. The index is rewritten atomically on
//! every publish.

use crate::error::{Error, Result};
use crate::hash::sha256;
use crate::version::Version;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    ArtifactFetcher, AuthToken, PackageSource, PackageSpec, PublishManifest, Registry, SearchHit,
    apply_publish,
};

const INDEX_FILE: &str = "index.json";

/// Registry stored in a local directory
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build from a `file://` URL
    pub fn from_url(url: &str) -> Result<Self> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| Error::Config(format!("Not a file:// registry URL: {}", url)))?;
        if path.is_empty() {
            return Err(Error::Config(format!("Empty path in registry URL: {}", url)));
        }
        Ok(Self::new(path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Relative artifact location for a version
    pub fn artifact_relpath(name: &str, version: &Version) -> PathBuf {
        PathBuf::from(name)
            .join(version.to_string())
            .join(format!("{}-{}.tar.gz", name, version))
    }

    fn load_index(&self) -> Result<BTreeMap<String, PackageSpec>> {
        let path = self.index_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No registry index at {}", path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    fn save_index(&self, index: &BTreeMap<String, PackageSpec>) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(index)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(self.index_path()).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

impl PackageSource for LocalRegistry {
    fn get_package_spec(&self, name: &str) -> Result<PackageSpec> {
        self.load_index()?
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("package {}", name)))
    }
}

impl ArtifactFetcher for LocalRegistry {
    fn fetch_artifact(&self, name: &str, version: &Version) -> Result<Box<dyn Read + Send>> {
        let path = self.root.join(Self::artifact_relpath(name, version));
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "artifact {} {} ({})",
                name,
                version,
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

impl Registry for LocalRegistry {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        Ok(self
            .load_index()?
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
        let mut index = self.load_index()?;
        let relpath = Self::artifact_relpath(&manifest.name, &manifest.version);
        let spec = apply_publish(
            index.remove(&manifest.name),
            manifest,
            sha256(artifact),
            Some(relpath.to_string_lossy().into_owned()),
        )?;

        let dest = self.root.join(&relpath);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, artifact)?;

        index.insert(manifest.name.clone(), spec);
        self.save_index(&index)?;

        info!(
            "Published {} {} to {}",
            manifest.name,
            manifest.version,
            self.root.display()
        );
        Ok(())
    }
}
