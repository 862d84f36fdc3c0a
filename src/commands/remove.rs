// src/commands/remove.rs
//! Package removal

use super::apply_changeset;
use anyhow::{Context, Result};
use llamapkg::manager::PackageManager;
use tracing::info;

/// Remove packages and any dependencies left without a dependent
pub fn cmd_remove(manager: &PackageManager, packages: &[String], dry_run: bool) -> Result<()> {
    info!("Removing: {}", packages.join(", "));

    let changeset = manager
        .plan_remove(packages)
        .with_context(|| format!("Cannot remove {}", packages.join(", ")))?;
    apply_changeset(manager, &changeset, dry_run)
}
