// src/config.rs

//! User configuration
//!
//! Loaded from TOML at `$LLAMAPKG_CONFIG` or
//! `<config dir>/llamapkg/config.toml`. Every field has a default, so a
//! missing file (or a partial one) is fine:
//!
//! ```toml
//! registry_url = "file:///srv/llamapkg-index"
//! state_dir = "/var/lib/llamapkg"
//!
//! [fetch]
//! workers = 8
//! max_attempts = 5
//!
//! [resolver]
//! policy = "prefer-latest"
//! ```

use crate::error::{Error, Result};
use crate::planner::PlannerSettings;
use crate::resolver::{DEFAULT_MAX_STEPS, policy_from_name};
use crate::transaction::{InstallerConfig, MAX_ATTEMPTS_LIMIT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "LLAMAPKG_CONFIG";

/// Default registry endpoint
pub const DEFAULT_REGISTRY_URL: &str = "https://packages.llamasearch.ai";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Registry base URL; `file://` selects a local index directory
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Store record, lock, journals and scratch space
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Visible package contents; defaults to `<state_dir>/packages`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Artifact download settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Parallel downloads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per artifact, counting the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds); doubles per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-request registry timeout (seconds)
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Refuse registry entries without a sha256 digest
    #[serde(default)]
    pub require_digest: bool,
}

/// Resolver limits and candidate ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Wall-clock limit (seconds); 0 disables it
    #[serde(default = "default_resolve_timeout")]
    pub timeout_secs: u64,

    /// `prefer-installed` or `prefer-latest`
    #[serde(default = "default_policy")]
    pub policy: String,
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llamapkg")
}

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_resolve_timeout() -> u64 {
    30
}

fn default_policy() -> String {
    "prefer-installed".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            state_dir: default_state_dir(),
            install_root: None,
            fetch: FetchConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_fetch_timeout(),
            require_digest: false,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            timeout_secs: default_resolve_timeout(),
            policy: default_policy(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("llamapkg").join("config.toml"))
    }

    /// Load from `path`, or from the default location
    ///
    /// A missing file yields defaults. An explicitly named file that does not
    /// exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fetch.workers == 0 {
            return Err(Error::Config("fetch.workers must be at least 1".to_string()));
        }
        if self.fetch.max_attempts == 0 || self.fetch.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(Error::Config(format!(
                "fetch.max_attempts must be between 1 and {}",
                MAX_ATTEMPTS_LIMIT
            )));
        }
        if self.resolver.max_steps == 0 {
            return Err(Error::Config(
                "resolver.max_steps must be at least 1".to_string(),
            ));
        }
        policy_from_name(&self.resolver.policy)?;
        Ok(())
    }

    /// Effective install root
    pub fn install_root(&self) -> PathBuf {
        self.install_root
            .clone()
            .unwrap_or_else(|| self.state_dir.join("packages"))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn installer_config(&self) -> InstallerConfig {
        let mut config = InstallerConfig::new(&self.state_dir, self.install_root());
        config.workers = self.fetch.workers;
        config.max_attempts = self.fetch.max_attempts;
        config.backoff = Duration::from_millis(self.fetch.backoff_ms);
        config.require_digest = self.fetch.require_digest;
        config
    }

    pub fn planner_settings(&self) -> PlannerSettings {
        PlannerSettings {
            max_steps: self.resolver.max_steps,
            timeout: (self.resolver.timeout_secs > 0)
                .then(|| Duration::from_secs(self.resolver.timeout_secs)),
            policy: self.resolver.policy.clone(),
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("cannot render config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.registry_url, DEFAULT_REGISTRY_URL);
        assert_eq!(config.fetch.workers, 4);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.fetch.backoff_ms, 250);
        assert_eq!(config.resolver.max_steps, 100_000);
        assert_eq!(config.resolver.policy, "prefer-installed");
        assert_eq!(config.install_root(), config.state_dir.join("packages"));
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml(
            r#"
            registry_url = "file:///srv/index"
            state_dir = "/var/lib/llamapkg"

            [fetch]
            workers = 8

            [resolver]
            policy = "prefer-latest"
            timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.registry_url, "file:///srv/index");
        assert_eq!(config.fetch.workers, 8);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(
            config.install_root(),
            PathBuf::from("/var/lib/llamapkg/packages")
        );

        let settings = config.planner_settings();
        assert_eq!(settings.timeout, None);
        assert_eq!(settings.policy, "prefer-latest");

        let installer = config.installer_config();
        assert_eq!(installer.workers, 8);
        assert_eq!(installer.journal_dir, PathBuf::from("/var/lib/llamapkg/journal"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml("[fetch]\nworkers = 0\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[fetch]\nmax_attempts = 0\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[fetch]\nmax_attempts = 40\n"),
            Err(Error::Config(_))
        ));
        assert!(Config::from_toml("[fetch]\nmax_attempts = 10\n").is_ok());
        assert!(matches!(
            Config::from_toml("[resolver]\npolicy = \"newest-first\"\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("registry_url = 42\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[fetch]\nmax_attempts = 5\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.fetch.max_attempts, 5);

        let missing = temp.path().join("nope.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(Error::Config(_))));
    }

    #[test]
    fn test_render_roundtrips() {
        let mut config = Config::default();
        config.state_dir = PathBuf::from("/tmp/llamapkg");
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }
}
