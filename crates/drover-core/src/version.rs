//! `major.minor.patch` versions for SDK compatibility checks.
//!
//! Plugins may declare a `min_sdk_version` in their descriptor. The host
//! refuses to load a plugin whose minimum is not satisfied by [`SDK_VERSION`].

use std::cmp::Ordering;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Version of the plugin SDK and protocol vocabulary shipped in this build.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A parsed semantic version without pre-release or build metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Breaking changes.
    pub major: u32,
    /// Backwards-compatible features.
    pub minor: u32,
    /// Fixes.
    pub patch: u32,
}

impl Version {
    /// Creates a new version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The version of [`SDK_VERSION`].
    ///
    /// Falls back to `0.0.0` if the package version carries a pre-release
    /// suffix that does not parse.
    #[must_use]
    pub fn sdk() -> Self {
        SDK_VERSION.parse().unwrap_or(Self::new(0, 0, 0))
    }

    /// Whether a runtime at `self` satisfies a requirement of `minimum`.
    ///
    /// The major versions must match and `self` must not be older than
    /// `minimum`.
    #[must_use]
    pub fn satisfies(&self, minimum: &Self) -> bool {
        self.major == minimum.major && self >= minimum
    }

    /// Whether `other` can be used where `self` was expected.
    ///
    /// Same major version, and `other` has at least the minor version of
    /// `self`.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.major == other.major && other.minor >= self.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

/// Error returned when parsing a version string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    /// Wrong number of segments.
    #[error("invalid version format: {0} (expected major.minor.patch)")]
    InvalidFormat(String),
    /// A segment is not a number.
    #[error("invalid version number: {0}")]
    InvalidNumber(#[from] ParseIntError),
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut parts = trimmed.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(major), Some(minor), Some(patch), None) => Ok(Self {
                major: major.parse()?,
                minor: minor.parse()?,
                patch: patch.parse()?,
            }),
            _ => Err(VersionParseError::InvalidFormat(s.to_string())),
        }
    }
}
