// src/lib.rs

//! llamapkg
//!
//! Package manager core: deterministic dependency resolution and a local
//! package store that changes only through atomic, journaled transactions.
//!
//! # Architecture
//!
//! - [`version`]: strict semantic versions and range constraints
//! - [`resolver`]: backtracking resolution into a [`resolver::ResolvedGraph`],
//!   with pluggable candidate ordering and minimal conflict reports
//! - [`store`]: the installed-package record, checksummed and replaced by
//!   atomic rename under an exclusive lock
//! - [`transaction`]: ChangeSets and the installer that fetches, verifies,
//!   stages and commits them, rolling back on failure or after a crash
//! - [`planner`]: install, update and remove intents turned into ChangeSets
//! - [`registry`]: metadata and artifact sources (local directory, HTTP,
//!   in-memory)
//! - [`manager`]: the [`manager::PackageManager`] facade tying these together
//!
//! ```no_run
//! use llamapkg::config::Config;
//! use llamapkg::manager::{PackageManager, parse_requests};
//!
//! # fn main() -> llamapkg::Result<()> {
//! let manager = PackageManager::open(Config::load(None)?, None)?;
//! let changeset = manager.plan_install(&parse_requests(&["app@^1.2".to_string()])?)?;
//! manager.apply(&changeset)?.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod hash;
pub mod manager;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod transaction;
pub mod version;

pub use error::{Error, Result};
pub use manager::PackageManager;
pub use progress::{LogProgress, ProgressTracker, SilentProgress};
pub use resolver::{ConflictError, ResolvedGraph, Resolver, RootRequest};
pub use store::{InstalledPackage, LocalStore, StoreState};
pub use transaction::{ApplyOutcome, ChangeSet, InstallStage, Operation};
pub use version::{Constraint, Version};
