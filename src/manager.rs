// src/manager.rs

//! Package manager facade
//!
//! [`PackageManager`] wires configuration, the local store, a registry, the
//! integrity verifier and the artifact unpacker together. Planning calls read
//! a store snapshot and never take the lock; [`PackageManager::apply`] is the
//! only path that changes anything.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::{IntegrityVerifier, Sha256Verifier};
use crate::planner::{UpdatePlanner, UpdateTarget};
use crate::registry::{
    AuthToken, HttpRegistry, LocalRegistry, PublishManifest, Registry, SearchHit,
};
use crate::resolver::{ResolvedGraph, RootRequest};
use crate::store::{LocalStore, StoreState};
use crate::transaction::{
    ApplyOutcome, ArtifactUnpacker, ChangeSet, InstallOptions, Installer, RecoveryOutcome,
    TarballUnpacker,
};
use crate::version::Constraint;
use std::sync::Arc;
use tracing::info;

/// Pick the registry implementation for a URL
///
/// `file://` URLs name a local index directory; anything else is an HTTP
/// registry base URL.
pub fn open_registry(config: &Config, token: Option<AuthToken>) -> Result<Box<dyn Registry>> {
    if config.registry_url.starts_with("file://") {
        Ok(Box::new(LocalRegistry::from_url(&config.registry_url)?))
    } else {
        Ok(Box::new(HttpRegistry::new(
            &config.registry_url,
            token,
            config.fetch_timeout(),
        )?))
    }
}

/// High-level package operations
pub struct PackageManager {
    config: Config,
    store: LocalStore,
    registry: Box<dyn Registry>,
    verifier: Box<dyn IntegrityVerifier>,
    unpacker: Box<dyn ArtifactUnpacker>,
    token: Option<AuthToken>,
    options: InstallOptions,
}

impl PackageManager {
    /// Open the store and the configured registry
    pub fn open(config: Config, token: Option<AuthToken>) -> Result<Self> {
        config.validate()?;
        let registry = open_registry(&config, token.clone())?;
        let mut manager = Self::with_registry(config, registry)?;
        manager.token = token;
        Ok(manager)
    }

    /// Open the store with an explicit registry
    pub fn with_registry(config: Config, registry: Box<dyn Registry>) -> Result<Self> {
        let store = LocalStore::open(&config.state_dir)?;
        Ok(Self {
            config,
            store,
            registry,
            verifier: Box::new(Sha256Verifier),
            unpacker: Box::new(TarballUnpacker),
            token: None,
            options: InstallOptions::default(),
        })
    }

    pub fn with_verifier(mut self, verifier: Box<dyn IntegrityVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_unpacker(mut self, unpacker: Box<dyn ArtifactUnpacker>) -> Self {
        self.unpacker = unpacker;
        self
    }

    /// Cancellation and progress for subsequent calls
    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    fn planner(&self) -> UpdatePlanner<'_> {
        let planner = UpdatePlanner::new(self.registry.as_ref(), self.config.planner_settings());
        match &self.options.cancel {
            Some(cancel) => planner.with_cancel(Arc::clone(cancel)),
            None => planner,
        }
    }

    fn installer(&self) -> Installer<'_> {
        Installer::new(
            &self.store,
            self.registry.as_ref(),
            self.verifier.as_ref(),
            self.unpacker.as_ref(),
            self.config.installer_config(),
        )
        .with_options(self.options.clone())
    }

    /// Installed packages as last committed
    pub fn current_state(&self) -> Result<StoreState> {
        self.store.load()
    }

    /// Resolve requests together with the installed roots; changes nothing
    pub fn resolve(&self, requests: &[RootRequest]) -> Result<ResolvedGraph> {
        self.planner().resolve(&self.current_state()?, requests)
    }

    pub fn plan_install(&self, requests: &[RootRequest]) -> Result<ChangeSet> {
        self.planner().plan_install(&self.current_state()?, requests)
    }

    pub fn plan_update(&self, target: &UpdateTarget, to: Option<Constraint>) -> Result<ChangeSet> {
        self.planner()
            .plan_update(&self.current_state()?, target, to)
    }

    pub fn plan_remove(&self, names: &[String]) -> Result<ChangeSet> {
        self.planner().plan_remove(&self.current_state()?, names)
    }

    /// Apply a planned ChangeSet
    pub fn apply(&self, changeset: &ChangeSet) -> Result<ApplyOutcome> {
        self.installer().apply(changeset)
    }

    /// Apply with options for this call only
    pub fn apply_with(&self, changeset: &ChangeSet, options: InstallOptions) -> Result<ApplyOutcome> {
        self.installer().with_options(options).apply(changeset)
    }

    /// Roll back transactions interrupted by a crash
    pub fn recover(&self) -> Result<Vec<RecoveryOutcome>> {
        self.installer().recover()
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.registry.search(query)
    }

    pub fn publish(&self, manifest: &PublishManifest, artifact: &[u8]) -> Result<()> {
        self.registry
            .publish(manifest, artifact, self.token.as_ref())?;
        info!("Published {} {}", manifest.name, manifest.version);
        Ok(())
    }

    /// Check the store record and the install root agree
    ///
    /// Returns one message per problem; an unreadable store record is an
    /// error instead.
    pub fn verify(&self) -> Result<Vec<String>> {
        let state = self.current_state()?;
        let install_root = self.config.install_root();
        let mut problems = Vec::new();

        for pkg in state.packages.values() {
            let dir = install_root.join(&pkg.name);
            if !dir.is_dir() {
                problems.push(format!(
                    "{} {}: missing directory {}",
                    pkg.name,
                    pkg.version,
                    dir.display()
                ));
            }
            if !pkg.root && pkg.required_by.is_empty() {
                problems.push(format!("{} {}: orphaned dependency", pkg.name, pkg.version));
            }
        }

        if let Err(e) = state.dependency_graph().topological_order() {
            problems.push(format!("installed packages form a cycle: {}", e));
        }

        Ok(problems)
    }
}

impl std::fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageManager")
            .field("registry_url", &self.config.registry_url)
            .field("state_dir", &self.config.state_dir)
            .finish_non_exhaustive()
    }
}

/// Parse `name` or `name@constraint` command-line requests
pub fn parse_requests(specs: &[String]) -> Result<Vec<RootRequest>> {
    if specs.is_empty() {
        return Err(Error::Config("no packages given".to_string()));
    }
    specs.iter().map(|s| RootRequest::parse(s)).collect()
}
