// src/commands/system.rs
//! Recovery and consistency checks

use anyhow::{Result, bail};
use llamapkg::manager::PackageManager;

pub fn cmd_recover(manager: &PackageManager) -> Result<()> {
    let outcomes = manager.recover()?;
    if outcomes.is_empty() {
        println!("No interrupted transactions");
    }
    for outcome in outcomes {
        println!("{}", outcome);
    }
    Ok(())
}

pub fn cmd_verify(manager: &PackageManager) -> Result<()> {
    let problems = manager.verify()?;
    if problems.is_empty() {
        println!("Store is consistent");
        return Ok(());
    }

    for problem in &problems {
        println!("{}", problem);
    }
    bail!("{} problem(s) found", problems.len())
}
