// src/version/constraint.rs

//! Version constraints
//!
//! A constraint is a comma-separated list of comparators that must all hold.
//! Accepted operators: `=` (or `==`), `!=`, `>`, `>=`, `<`, `<=`, `~` (or `~=`)
//! and `^`. A bare version means an exact match; `*` or empty text matches
//! everything.
//!
//! Comparator versions may be partial (`1`, `1.4`). Missing components behave
//! as wildcards, so `=1.4` admits any 1.4.x, `<=1.4` admits everything below
//! 1.5.0 and `>1.4` starts at 1.5.0.
//!
//! Pre-release versions only satisfy a constraint that names a pre-release in
//! at least one of its comparators.

use super::Version;
use crate::error::{Error, Result};
use semver::Prerelease;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a single comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Exact,
    NotEqual,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    /// Same major.minor, patch at least the given one
    Tilde,
    /// Same leading nonzero component
    Caret,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Exact => "=",
            Op::NotEqual => "!=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
            Op::Tilde => "~",
            Op::Caret => "^",
        }
    }
}

/// One `op version` clause, with a possibly partial version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Comparator {
    pub op: Op,
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub pre: Prerelease,
}

impl Comparator {
    /// Exact comparator for a complete version
    pub fn exact(version: &Version) -> Self {
        Self {
            op: Op::Exact,
            major: version.major,
            minor: Some(version.minor),
            patch: Some(version.patch),
            pre: version.pre.clone(),
        }
    }

    fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        // Two-character operators first so ">=" is not read as ">"
        const OPERATORS: &[(&str, Op)] = &[
            (">=", Op::GreaterEq),
            ("<=", Op::LessEq),
            ("==", Op::Exact),
            ("!=", Op::NotEqual),
            ("~=", Op::Tilde),
            (">", Op::Greater),
            ("<", Op::Less),
            ("=", Op::Exact),
            ("~", Op::Tilde),
            ("^", Op::Caret),
        ];

        let (op, rest) = OPERATORS
            .iter()
            .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Exact, text));

        let rest = rest.trim();
        if rest.is_empty() {
            return Err(Error::InvalidConstraint(format!(
                "'{}': missing version after operator",
                text
            )));
        }
        if rest.contains('+') {
            return Err(Error::InvalidConstraint(format!(
                "'{}': build metadata is not supported",
                text
            )));
        }

        let (numbers, pre) = match rest.split_once('-') {
            Some((numbers, pre)) => (numbers, Some(pre)),
            None => (rest, None),
        };

        let mut parts = numbers.split('.');
        let major = parse_component(parts.next(), text)?
            .ok_or_else(|| Error::InvalidConstraint(format!("'{}': missing major version", text)))?;
        let minor = parse_component(parts.next(), text)?;
        let patch = match minor {
            Some(_) => parse_component(parts.next(), text)?,
            None => {
                // "1.*.3" style wildcards are not meaningful
                if parts.next().is_some() {
                    return Err(Error::InvalidConstraint(format!(
                        "'{}': components after a wildcard",
                        text
                    )));
                }
                None
            }
        };
        if parts.next().is_some() {
            return Err(Error::InvalidConstraint(format!(
                "'{}': too many version components",
                text
            )));
        }

        let pre = match pre {
            Some(pre) => {
                if patch.is_none() {
                    return Err(Error::InvalidConstraint(format!(
                        "'{}': pre-release requires a full version",
                        text
                    )));
                }
                Prerelease::new(pre)
                    .map_err(|e| Error::InvalidConstraint(format!("'{}': {}", text, e)))?
            }
            None => Prerelease::EMPTY,
        };

        Ok(Self {
            op,
            major,
            minor,
            patch,
            pre,
        })
    }

    /// Check the comparator against a version, ignoring the pre-release gate
    pub fn matches(&self, ver: &Version) -> bool {
        match self.op {
            Op::Exact => self.matches_exact(ver),
            Op::NotEqual => !self.matches_exact(ver),
            Op::Greater => self.matches_greater(ver),
            Op::GreaterEq => self.matches_exact(ver) || self.matches_greater(ver),
            Op::Less => self.matches_less(ver),
            Op::LessEq => self.matches_exact(ver) || self.matches_less(ver),
            Op::Tilde => self.matches_tilde(ver),
            Op::Caret => self.matches_caret(ver),
        }
    }

    fn matches_exact(&self, ver: &Version) -> bool {
        if ver.major != self.major {
            return false;
        }
        if let Some(minor) = self.minor
            && ver.minor != minor
        {
            return false;
        }
        if let Some(patch) = self.patch
            && ver.patch != patch
        {
            return false;
        }
        // A partial comparator names no pre-release
        self.patch.is_none() || ver.pre == self.pre
    }

    fn matches_greater(&self, ver: &Version) -> bool {
        if ver.major != self.major {
            return ver.major > self.major;
        }
        let Some(minor) = self.minor else {
            return false;
        };
        if ver.minor != minor {
            return ver.minor > minor;
        }
        let Some(patch) = self.patch else {
            return false;
        };
        if ver.patch != patch {
            return ver.patch > patch;
        }
        ver.pre > self.pre
    }

    fn matches_less(&self, ver: &Version) -> bool {
        if ver.major != self.major {
            return ver.major < self.major;
        }
        let Some(minor) = self.minor else {
            return false;
        };
        if ver.minor != minor {
            return ver.minor < minor;
        }
        let Some(patch) = self.patch else {
            return false;
        };
        if ver.patch != patch {
            return ver.patch < patch;
        }
        ver.pre < self.pre
    }

    fn matches_tilde(&self, ver: &Version) -> bool {
        if ver.major != self.major {
            return false;
        }
        if let Some(minor) = self.minor
            && ver.minor != minor
        {
            return false;
        }
        if let Some(patch) = self.patch
            && ver.patch != patch
        {
            return ver.patch > patch;
        }
        ver.pre >= self.pre
    }

    fn matches_caret(&self, ver: &Version) -> bool {
        if ver.major != self.major {
            return false;
        }
        let Some(minor) = self.minor else {
            return true;
        };
        let Some(patch) = self.patch else {
            return if self.major > 0 {
                ver.minor >= minor
            } else {
                ver.minor == minor
            };
        };

        if self.major > 0 {
            if ver.minor != minor {
                return ver.minor > minor;
            }
            if ver.patch != patch {
                return ver.patch > patch;
            }
        } else if minor > 0 {
            if ver.minor != minor {
                return false;
            }
            if ver.patch != patch {
                return ver.patch > patch;
            }
        } else if ver.minor != minor || ver.patch != patch {
            return false;
        }

        ver.pre >= self.pre
    }
}

fn parse_component(part: Option<&str>, text: &str) -> Result<Option<u64>> {
    match part {
        None | Some("*") | Some("x") | Some("X") => Ok(None),
        Some(digits) => {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidConstraint(format!(
                    "'{}': invalid version component '{}'",
                    text, digits
                )));
            }
            if digits.len() > 1 && digits.starts_with('0') {
                return Err(Error::InvalidConstraint(format!(
                    "'{}': leading zero in '{}'",
                    text, digits
                )));
            }
            digits.parse::<u64>().map(Some).map_err(|e| {
                Error::InvalidConstraint(format!("'{}': {}", text, e))
            })
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.major)?;
        match self.minor {
            Some(minor) => write!(f, ".{}", minor)?,
            None => return Ok(()),
        }
        match self.patch {
            Some(patch) => write!(f, ".{}", patch)?,
            None => return Ok(()),
        }
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

/// A conjunction of comparators; empty means any version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Constraint {
    comparators: Vec<Comparator>,
}

impl Constraint {
    /// Constraint that every release version satisfies
    pub fn any() -> Self {
        Self::default()
    }

    /// Constraint matching exactly one version
    pub fn exact(version: &Version) -> Self {
        Self {
            comparators: vec![Comparator::exact(version)],
        }
    }

    /// Parse constraint text such as `">=1.3, <1.5"` or `"^2.0.0"`
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::any());
        }

        let comparators = trimmed
            .split(',')
            .map(Comparator::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { comparators })
    }

    pub fn comparators(&self) -> &[Comparator] {
        &self.comparators
    }

    pub fn is_any(&self) -> bool {
        self.comparators.is_empty()
    }

    /// Whether any comparator names a pre-release version
    pub fn names_prerelease(&self) -> bool {
        self.comparators.iter().any(|c| !c.pre.is_empty())
    }

    /// Check a version against every comparator
    pub fn satisfies(&self, version: &Version) -> bool {
        if version.is_prerelease() && !self.names_prerelease() {
            return false;
        }
        self.comparators.iter().all(|c| c.matches(version))
    }

    /// Conjunction of two constraints
    pub fn and(&self, other: &Constraint) -> Constraint {
        let mut comparators = self.comparators.clone();
        for c in &other.comparators {
            if !comparators.contains(c) {
                comparators.push(c.clone());
            }
        }
        Constraint { comparators }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comparators.is_empty() {
            return write!(f, "*");
        }
        for (i, c) in self.comparators.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl FromStr for Constraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Constraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Constraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Constraint::parse(&s).map_err(serde::de::Error::custom)
    }
}
