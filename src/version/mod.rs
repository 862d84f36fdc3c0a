// src/version/mod.rs

//! Version handling and constraint satisfaction for package dependencies
//!
//! Versions are strict `MAJOR.MINOR.PATCH[-PRE]` triples. Ordering compares the
//! numeric components first and then pre-release precedence, so `1.0.0-rc.1`
//! sorts before `1.0.0`. Build metadata (`+...`) is not accepted.

mod constraint;

pub use constraint::{Comparator, Constraint, Op};

use crate::error::{Error, Result};
use semver::Prerelease;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed package version
///
/// Field order matters: the derived `Ord` compares major, minor, patch and then
/// the pre-release label, where an empty label outranks any non-empty one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Prerelease,
}

impl Version {
    /// Create a release version (no pre-release label)
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Prerelease::EMPTY,
        }
    }

    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → 1.2.3
    /// - "2.0.0-rc.1" → 2.0.0 with pre-release "rc.1"
    /// - "1.2", "v1.2.3", "01.2.3", "1.2.3+build" → InvalidVersionFormat
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.contains('+') {
            return Err(Error::InvalidVersionFormat(format!(
                "'{}': build metadata is not supported",
                s
            )));
        }

        let parsed = semver::Version::parse(trimmed)
            .map_err(|e| Error::InvalidVersionFormat(format!("'{}': {}", s, e)))?;

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            pre: parsed.pre,
        })
    }

    /// Compare two versions
    pub fn compare(&self, other: &Version) -> Ordering {
        self.cmp(other)
    }

    /// Whether this version carries a pre-release label
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Compare two version strings
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// Check whether `version` satisfies `constraint`
pub fn satisfies(version: &Version, constraint: &Constraint) -> bool {
    constraint.satisfies(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_simple() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert!(!v.is_prerelease());
    }

    #[test]
    fn test_version_parse_prerelease() {
        let v = Version::parse("2.0.0-rc.1").unwrap();
        assert_eq!(v.major, 2);
        assert_eq!(v.pre.as_str(), "rc.1");
        assert!(v.is_prerelease());
    }

    #[test]
    fn test_version_parse_rejects_malformed() {
        for bad in ["", "1", "1.2", "v1.2.3", "01.2.3", "1.2.3+build.5", "1.2.x", "a.b.c"] {
            assert!(
                matches!(Version::parse(bad), Err(Error::InvalidVersionFormat(_))),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_version_compare_numeric() {
        let v1 = Version::parse("1.2.3").unwrap();
        let v2 = Version::parse("1.10.0").unwrap();
        assert!(v1 < v2); // numeric, not lexicographic
    }

    #[test]
    fn test_prerelease_orders_before_release() {
        let rc = Version::parse("1.0.0-rc.1").unwrap();
        let release = Version::parse("1.0.0").unwrap();
        let prev = Version::parse("0.9.9").unwrap();
        assert!(rc < release);
        assert!(prev < rc);
    }

    #[test]
    fn test_prerelease_identifier_precedence() {
        let mut versions: Vec<Version> = [
            "1.0.0-rc.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta.11",
            "1.0.0",
            "1.0.0-alpha",
            "1.0.0-beta.2",
            "1.0.0-alpha.1",
            "1.0.0-beta",
        ]
        .iter()
        .map(|s| Version::parse(s).unwrap())
        .collect();
        versions.sort();

        let ordered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(
            ordered,
            vec![
                "1.0.0-alpha",
                "1.0.0-alpha.1",
                "1.0.0-alpha.beta",
                "1.0.0-beta",
                "1.0.0-beta.2",
                "1.0.0-beta.11",
                "1.0.0-rc.1",
                "1.0.0",
            ]
        );
    }

    #[test]
    fn test_compare_strings() {
        assert_eq!(compare("1.0.0", "1.0.1").unwrap(), Ordering::Less);
        assert_eq!(compare("2.0.0", "2.0.0").unwrap(), Ordering::Equal);
        assert!(compare("2.0", "2.0.0").is_err());
    }

    #[test]
    fn test_version_serde_as_string() {
        let v = Version::parse("1.4.2-beta").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1.4.2-beta\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert!(serde_json::from_str::<Version>("\"1.4\"").is_err());
    }
}
