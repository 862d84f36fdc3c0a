// src/commands/query.rs
//! Store and resolution queries

use anyhow::{Result, anyhow};
use llamapkg::manager::{PackageManager, parse_requests};

/// List installed packages
pub fn cmd_list(manager: &PackageManager, roots_only: bool) -> Result<()> {
    let state = manager.current_state()?;
    if state.is_empty() {
        println!("No packages installed");
        return Ok(());
    }

    for pkg in state.packages.values().filter(|p| !roots_only || p.root) {
        let marker = if pkg.root { " (requested)" } else { "" };
        println!("{} {}{}", pkg.name, pkg.version, marker);
    }
    println!("\nGeneration {}", state.generation);
    Ok(())
}

/// Explain why a package is installed
pub fn cmd_why(manager: &PackageManager, package: &str) -> Result<()> {
    let state = manager.current_state()?;
    let (root, required_by) = state
        .why(package)
        .ok_or_else(|| anyhow!("Package '{}' is not installed", package))?;

    if root {
        let constraint = state
            .get(package)
            .and_then(|p| p.requested.as_ref())
            .map(|c| c.to_string())
            .unwrap_or_else(|| "*".to_string());
        println!("{} was requested ({})", package, constraint);
    }
    for requirer in &required_by {
        println!("{} is required by {}", package, requirer);
    }
    Ok(())
}

/// Print the versions a request would resolve to, without changing anything
pub fn cmd_resolve(manager: &PackageManager, packages: &[String]) -> Result<()> {
    let requests = parse_requests(packages)?;
    let graph = manager.resolve(&requests)?;

    for name in graph.install_order()? {
        let Some(pkg) = graph.get(&name) else { continue };
        println!("{} {}", pkg.name, pkg.version);
        for dep in &pkg.dependencies {
            if let Some(version) = graph.version(&dep.name) {
                let optional = if dep.optional { ", optional" } else { "" };
                println!("  -> {} {} ({}{})", dep.name, version, dep.constraint, optional);
            }
        }
    }
    Ok(())
}
