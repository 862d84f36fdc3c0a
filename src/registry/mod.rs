// src/registry/mod.rs

//! Registry collaborators
//!
//! The resolver and installer never talk to a registry directly. They go
//! through the narrow traits defined here:
//!
//! - [`PackageSource`]: package metadata lookup (immutable within one resolution run)
//! - [`ArtifactFetcher`]: artifact byte streams
//! - [`Registry`]: a full registry that can also search and accept publishes
//!
//! Three implementations ship with the crate: [`LocalRegistry`] (a directory,
//! selected by `file://` URLs), [`HttpRegistry`] (the JSON API) and
//! [`MemoryRegistry`] (in-process, for tests and embedding).

mod http;
mod local;
mod memory;

pub use http::HttpRegistry;
pub use local::LocalRegistry;
pub use memory::MemoryRegistry;

use crate::error::{Error, Result};
use crate::version::{Constraint, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

/// One dependency declared by a package version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: Constraint,
    pub optional: bool,
}

/// Metadata for one published version of a package
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionEntry {
    #[serde(default)]
    pub dependencies: BTreeMap<String, Constraint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, Constraint>,
    /// Hex sha256 of the artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl VersionEntry {
    /// All dependencies in name order, required ones first
    pub fn all_dependencies(&self) -> Vec<Dependency> {
        let required = self.dependencies.iter().map(|(name, constraint)| Dependency {
            name: name.clone(),
            constraint: constraint.clone(),
            optional: false,
        });
        let optional = self
            .optional_dependencies
            .iter()
            .filter(|(name, _)| !self.dependencies.contains_key(*name))
            .map(|(name, constraint)| Dependency {
                name: name.clone(),
                constraint: constraint.clone(),
                optional: true,
            });
        required.chain(optional).collect()
    }
}

/// A package and every version the registry exposes for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub versions: BTreeMap<Version, VersionEntry>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            keywords: Vec::new(),
            versions: BTreeMap::new(),
        }
    }

    /// Versions in descending order
    pub fn versions_descending(&self) -> impl Iterator<Item = &Version> {
        self.versions.keys().rev()
    }

    pub fn latest(&self) -> Option<&Version> {
        self.versions.keys().next_back()
    }

    pub fn entry(&self, version: &Version) -> Option<&VersionEntry> {
        self.versions.get(version)
    }

    /// Case-insensitive match on name, description or keywords
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.keywords.iter().any(|k| k.to_lowercase().contains(&query))
    }
}

/// A search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub latest: Option<Version>,
}

impl From<&PackageSpec> for SearchHit {
    fn from(spec: &PackageSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            latest: spec.latest().cloned(),
        }
    }
}

/// Package metadata submitted with a publish request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishManifest {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Constraint>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, Constraint>,
}

impl PublishManifest {
    /// Read a manifest from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid package manifest: {}", e)))
    }
}

/// Opaque bearer token attached to registry calls
///
/// The value is never logged; `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for building request headers
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Registry metadata lookup
pub trait PackageSource {
    /// Full metadata for a package, or `Error::NotFound`
    fn get_package_spec(&self, name: &str) -> Result<PackageSpec>;

    /// Versions of a package in ascending order
    fn get_versions(&self, name: &str) -> Result<Vec<Version>> {
        Ok(self.get_package_spec(name)?.versions.into_keys().collect())
    }
}

/// Artifact download
pub trait ArtifactFetcher: Send + Sync {
    /// Open a byte stream for one package artifact
    fn fetch_artifact(&self, name: &str, version: &Version) -> Result<Box<dyn Read + Send>>;
}

/// A registry that can also be searched and published to
pub trait Registry: PackageSource + ArtifactFetcher {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>>;

    fn publish(
        &self,
        manifest: &PublishManifest,
        artifact: &[u8],
        token: Option<&AuthToken>,
    ) -> Result<()>;
}

/// Check a package name: lowercase, starts with a letter, ends alphanumeric
///
/// Allowed characters are `a-z`, `0-9`, `_` and `-`, and a name is at least two
/// characters long.
pub fn validate_package_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    let valid = bytes.len() >= 2
        && bytes[0].is_ascii_lowercase()
        && bytes
            .last()
            .is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_' || *b == b'-');

    if valid {
        Ok(())
    } else {
        Err(Error::Publish(format!(
            "Invalid package name '{}': must match [a-z][a-z0-9_-]*[a-z0-9]",
            name
        )))
    }
}

/// Check that a name can be used as a directory under the install root
///
/// Looser than [`validate_package_name`]: it only rejects names that are
/// empty, contain a path separator or start with a dot, so `..`, `./x` and
/// `a/b` are refused wherever a package name reaches the filesystem.
pub fn check_path_safe_name(name: &str) -> Result<()> {
    let safe = name
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));

    if safe {
        Ok(())
    } else {
        Err(Error::InvalidConstraint(format!(
            "invalid package name '{}'",
            name
        )))
    }
}

/// Build the document a registry stores for a newly published version
pub(crate) fn apply_publish(
    existing: Option<PackageSpec>,
    manifest: &PublishManifest,
    sha256: String,
    download_url: Option<String>,
) -> Result<PackageSpec> {
    validate_package_name(&manifest.name)?;

    let mut spec = existing.unwrap_or_else(|| PackageSpec::new(manifest.name.clone()));
    if spec.versions.contains_key(&manifest.version) {
        return Err(Error::Publish(format!(
            "Version {} of {} already exists",
            manifest.version, manifest.name
        )));
    }

    if !manifest.description.is_empty() {
        spec.description = manifest.description.clone();
    }
    if !manifest.keywords.is_empty() {
        spec.keywords = manifest.keywords.clone();
    }

    spec.versions.insert(
        manifest.version.clone(),
        VersionEntry {
            dependencies: manifest.dependencies.clone(),
            optional_dependencies: manifest.optional_dependencies.clone(),
            sha256: Some(sha256),
            download_url,
        },
    );

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_package_name() {
        for good in ["ab", "llama-utils", "my_pkg2", "a1"] {
            assert!(validate_package_name(good).is_ok(), "{} should be valid", good);
        }
        for bad in ["a", "Upper", "1abc", "trailing-", "has space", "dot.name", ""] {
            assert!(validate_package_name(bad).is_err(), "{} should be invalid", bad);
        }
    }

    #[test]
    fn test_path_safe_name() {
        for good in ["a", "lib", "dot.name", "Mixed_Case-1"] {
            assert!(check_path_safe_name(good).is_ok(), "{} should be accepted", good);
        }
        for bad in ["", ".", "..", "../escape", "a/b", "a\\b", ".hidden", "/abs", "nul\0"] {
            assert!(
                matches!(check_path_safe_name(bad), Err(Error::InvalidConstraint(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_spec_wire_format() {
        let json = r#"{
            "name": "app",
            "description": "An application",
            "versions": {
                "1.0.0": { "dependencies": { "lib": ">=1.0, <1.5" } },
                "1.2.0": {
                    "dependencies": { "lib": ">=1.3, <1.5" },
                    "optional_dependencies": { "extras": "^0.1" },
                    "sha256": "abc123"
                }
            }
        }"#;

        let spec: PackageSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.latest(), Some(&Version::new(1, 2, 0)));
        assert!(spec.keywords.is_empty());

        let entry = spec.entry(&Version::new(1, 2, 0)).unwrap();
        let deps = entry.all_dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "lib");
        assert!(!deps[0].optional);
        assert_eq!(deps[1].name, "extras");
        assert!(deps[1].optional);
    }

    #[test]
    fn test_search_matching() {
        let mut spec = PackageSpec::new("llama-vision");
        spec.description = "Image models".to_string();
        spec.keywords = vec!["CV".to_string()];

        assert!(spec.matches_query("vision"));
        assert!(spec.matches_query("image"));
        assert!(spec.matches_query("cv"));
        assert!(!spec.matches_query("audio"));
    }

    #[test]
    fn test_publish_rejects_duplicate_version() {
        let manifest = PublishManifest {
            name: "lib".to_string(),
            version: Version::new(1, 0, 0),
            description: String::new(),
            keywords: Vec::new(),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
        };

        let spec = apply_publish(None, &manifest, "00".to_string(), None).unwrap();
        assert_eq!(spec.versions.len(), 1);

        let again = apply_publish(Some(spec), &manifest, "00".to_string(), None);
        assert!(matches!(again, Err(Error::Publish(_))));
    }

    #[test]
    fn test_auth_token_debug_is_redacted() {
        let token = AuthToken::new("s3cret");
        assert!(!format!("{:?}", token).contains("s3cret"));
        assert_eq!(token.expose(), "s3cret");
    }

    #[test]
    fn test_manifest_from_toml() {
        let manifest = PublishManifest::from_toml(
            r#"
            name = "app"
            version = "1.2.0"
            description = "demo"

            [dependencies]
            lib = ">=1.3, <1.5"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.version, Version::new(1, 2, 0));
        assert_eq!(manifest.dependencies["lib"].to_string(), ">=1.3, <1.5");
    }
}
