// src/commands/repo.rs
//! Registry search and publishing

use anyhow::{Context, Result};
use llamapkg::manager::PackageManager;
use llamapkg::registry::PublishManifest;
use std::fs;
use std::path::Path;

pub fn cmd_search(manager: &PackageManager, query: &str) -> Result<()> {
    let hits = manager.search(query)?;
    if hits.is_empty() {
        println!("No packages match '{}'", query);
        return Ok(());
    }

    for hit in hits {
        let latest = hit
            .latest
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{} {} - {}", hit.name, latest, hit.description);
    }
    Ok(())
}

/// Publish an artifact described by a TOML manifest
pub fn cmd_publish(manager: &PackageManager, artifact: &Path, manifest: &Path) -> Result<()> {
    let text = fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
    let manifest = PublishManifest::from_toml(&text)?;
    let bytes = fs::read(artifact)
        .with_context(|| format!("Failed to read artifact {}", artifact.display()))?;

    manager
        .publish(&manifest, &bytes)
        .with_context(|| format!("Failed to publish {} {}", manifest.name, manifest.version))?;
    println!("Published {} {}", manifest.name, manifest.version);
    Ok(())
}
