// src/commands/mod.rs
//! Command handlers for the llamapkg CLI

mod config;
mod install;
pub mod progress;
mod query;
mod remove;
mod repo;
mod system;
mod update;

pub use config::cmd_config;
pub use install::cmd_install;
pub use query::{cmd_list, cmd_resolve, cmd_why};
pub use remove::cmd_remove;
pub use repo::{cmd_publish, cmd_search};
pub use system::{cmd_recover, cmd_verify};
pub use update::cmd_update;

use crate::cli::GlobalArgs;
use anyhow::{Context, Result, bail};
use llamapkg::config::Config;
use llamapkg::manager::PackageManager;
use llamapkg::registry::AuthToken;
use llamapkg::transaction::{ApplyOutcome, ChangeSet, InstallOptions};
use progress::CliProgress;
use std::sync::Arc;
use tracing::info;

/// Load the config file and apply command-line overrides
pub fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = Config::load(global.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = &global.registry {
        config.registry_url = url.clone();
    }
    if let Some(dir) = &global.state_dir {
        config.state_dir = dir.clone();
    }
    Ok(config)
}

/// Open the store and registry named by the config
pub fn open_manager(global: &GlobalArgs) -> Result<PackageManager> {
    let config = load_config(global)?;
    let token = global.token.clone().map(AuthToken::new);
    PackageManager::open(config, token).context("Failed to open package manager")
}

/// Print a ChangeSet, then apply it unless this is a dry run
fn apply_changeset(manager: &PackageManager, changeset: &ChangeSet, dry_run: bool) -> Result<()> {
    println!("{}:", changeset.description);
    println!("{}", changeset);

    if changeset.is_empty() {
        // Root markers and requested constraints may still change
        if manager.current_state()?.packages == changeset.target {
            return Ok(());
        }
        println!("  (package records only)");
    }
    if dry_run {
        println!("\nDry run: no changes made");
        return Ok(());
    }

    let progress = Arc::new(CliProgress::new("Fetching"));
    let options = InstallOptions::new().with_progress(progress);
    match manager.apply_with(changeset, options)? {
        ApplyOutcome::Done(report) => {
            info!("Changeset {} committed", report.changeset_id);
            println!(
                "\n{} installed, {} upgraded, {} removed (generation {})",
                report.installed, report.upgraded, report.removed, report.generation
            );
            Ok(())
        }
        ApplyOutcome::RolledBack { stage, reason } => {
            bail!("Rolled back while {}: {}", stage, reason)
        }
    }
}
