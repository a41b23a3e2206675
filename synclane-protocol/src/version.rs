//! Three-part protocol versions
//!
//! Ordering is lexicographic over `(major, minor, patch)`. Wire compatibility
//! is decided by the major component alone.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` protocol version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    /// Set only for the "not specified" sentinel
    unspecified: bool,
}

impl Version {
    /// Sentinel used when a connector did not declare any version
    pub const NOT_SPECIFIED: &'static str = "<not specified>";

    /// Build a version from its components
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            unspecified: false,
        }
    }

    /// The "not specified" sentinel, only meaningful for backward-compatibility probing
    pub const fn not_specified() -> Self {
        Self {
            major: 0,
            minor: 0,
            patch: 0,
            unspecified: true,
        }
    }

    /// Parse `major.minor.patch`; a leading `v` is tolerated
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_version("empty version string"));
        }
        if trimmed == Self::NOT_SPECIFIED {
            return Ok(Self::not_specified());
        }

        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut parts = body.splitn(3, '.');
        let mut next = |name: &str| -> Result<u64> {
            let raw = parts
                .next()
                .ok_or_else(|| Error::invalid_version(format!("{input}: missing {name}")))?;
            // Pre-release / build suffixes ("1.0.0-rc1") do not take part in ordering
            let digits: &str = raw
                .split(|c: char| c == '-' || c == '+')
                .next()
                .unwrap_or(raw);
            digits
                .parse::<u64>()
                .map_err(|_| Error::invalid_version(format!("{input}: bad {name} component")))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        Ok(Self::new(major, minor, patch))
    }

    /// Major component
    pub fn major(&self) -> u64 {
        self.major
    }

    /// Minor component
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// Patch component
    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// Major component as the string key used by registries and chains
    pub fn major_key(&self) -> String {
        self.major.to_string()
    }

    /// Whether this is the "not specified" sentinel
    pub fn is_unspecified(&self) -> bool {
        self.unspecified
    }

    /// Two versions are protocol-compatible iff their majors match
    pub fn compatible_with(&self, other: &Version) -> bool {
        !self.unspecified && !other.unspecified && self.major == other.major
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // The sentinel sorts below every real version
        match (self.unspecified, other.unspecified) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => (self.major, self.minor, self.patch).cmp(&(
                other.major,
                other.minor,
                other.patch,
            )),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unspecified {
            f.write_str(Self::NOT_SPECIFIED)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
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
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}
