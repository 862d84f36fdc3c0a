// src/commands/update.rs
//! Package updates

use super::apply_changeset;
use anyhow::{Context, Result};
use llamapkg::manager::PackageManager;
use llamapkg::planner::UpdateTarget;
use llamapkg::version::Constraint;

/// Update one package's subtree, or every root when no name is given
pub fn cmd_update(
    manager: &PackageManager,
    package: Option<String>,
    to: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let to = to
        .as_deref()
        .map(Constraint::parse)
        .transpose()
        .context("Invalid --to constraint")?;
    let target = match package {
        Some(name) => UpdateTarget::Package(name),
        None => UpdateTarget::All,
    };

    let changeset = manager
        .plan_update(&target, to)
        .context("Failed to plan update")?;
    apply_changeset(manager, &changeset, dry_run)
}
