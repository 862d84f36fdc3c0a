// src/cli/mod.rs
//! CLI definitions for llamapkg
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `install` / `remove` / `update` - plan a ChangeSet and apply it
//! - `list` / `why` - inspect the local store
//! - `resolve` - print the graph a request would produce
//! - `search` / `publish` - registry access
//! - `recover` / `verify` - crash recovery and consistency checks
//! - `config` - print the effective configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "llamapkg")]
#[command(version)]
#[command(about = "Package manager with deterministic resolution and atomic installs", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (default: $LLAMAPKG_CONFIG or the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Registry URL; file:// selects a local index directory
    #[arg(long, global = true)]
    pub registry: Option<String>,

    /// Directory holding the store record, journals and scratch space
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Registry auth token
    #[arg(long, global = true, env = "LLAMAPKG_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install packages (name or name@constraint)
    Install {
        /// Packages to install, e.g. app or app@^1.2
        #[arg(required = true)]
        packages: Vec<String>,

        /// Show what would change without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove installed packages and dependencies nothing else needs
    Remove {
        /// Package names to remove
        #[arg(required = true)]
        packages: Vec<String>,

        /// Show what would change without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// Update one package and its dependencies, or everything
    Update {
        /// Package to update (default: all roots, latest versions)
        package: Option<String>,

        /// New constraint for the package, e.g. ">=2.0, <3.0"
        #[arg(long)]
        to: Option<String>,

        /// Show what would change without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// List installed packages
    List {
        /// Only packages installed by request
        #[arg(long)]
        roots: bool,
    },

    /// Show why a package is installed
    Why {
        /// Installed package name
        package: String,
    },

    /// Resolve requests against the installed set and print the result
    Resolve {
        /// Packages to resolve, e.g. app or app@^1.2
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Search the registry
    Search {
        /// Substring of a name, description or keyword
        query: String,
    },

    /// Publish an artifact to the registry
    Publish {
        /// Artifact file (.tar.gz)
        artifact: PathBuf,

        /// Package manifest (TOML)
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Roll back transactions interrupted by a crash
    Recover,

    /// Check the store record against the install root
    Verify,

    /// Print the effective configuration
    Config,
}
