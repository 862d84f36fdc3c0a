// src/commands/install.rs
//! Package installation

use super::apply_changeset;
use anyhow::{Context, Result};
use llamapkg::manager::{PackageManager, parse_requests};
use tracing::info;

/// Install packages given as `name` or `name@constraint`
pub fn cmd_install(manager: &PackageManager, packages: &[String], dry_run: bool) -> Result<()> {
    let requests = parse_requests(packages)?;
    info!("Installing: {}", packages.join(", "));

    let changeset = manager
        .plan_install(&requests)
        .context("Failed to plan install")?;
    apply_changeset(manager, &changeset, dry_run)
}
