// SPDX-License-Identifier: MPL-2.0

//! Semantic versions and their total order.

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

/// Type for semantic versions: `major.minor.patch` with optional
/// prerelease and build tags.
///
/// Prerelease tags order according to semver precedence rules.
/// Build tags do not take part in precedence but are kept as an opaque
/// tiebreaker so that the order is total and consistent with equality.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: Option<String>,
    build: Option<String>,
}

// Constructors
impl Version {
    /// Create a version with "major", "minor" and "patch" values.
    /// `version = major.minor.patch`
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Attach a prerelease tag, e.g. `alpha.1`.
    pub fn with_prerelease(mut self, prerelease: impl Into<String>) -> Self {
        self.prerelease = Some(prerelease.into());
        self
    }

    /// Attach a build tag. Build tags are opaque to the resolver.
    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    /// Version 0.0.0.
    pub fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    /// Version 1.0.0.
    pub fn one() -> Self {
        Self::new(1, 0, 0)
    }

    /// The lowest version of all: `0.0.0-0`.
    pub fn lowest() -> Self {
        Self::new(0, 0, 0).with_prerelease("0")
    }
}

// Accessors
impl Version {
    /// The major number.
    pub fn major(&self) -> u64 {
        self.major
    }

    /// The minor number.
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// The patch number.
    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// The prerelease tag, if any.
    pub fn prerelease(&self) -> Option<&str> {
        self.prerelease.as_deref()
    }

    /// True if this version carries a prerelease tag.
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

// Bump versions.
impl Version {
    /// The smallest strictly higher version, disregarding build tags:
    /// `1.2.3` bumps to `1.2.4-0` and `1.2.3-alpha` bumps to `1.2.3-alpha.0`.
    pub fn bump(&self) -> Self {
        match &self.prerelease {
            Some(pre) => {
                Self::new(self.major, self.minor, self.patch).with_prerelease(format!("{pre}.0"))
            }
            None => Self::new(self.major, self.minor, self.patch + 1).with_prerelease("0"),
        }
    }

    /// Bump the patch number of a version, dropping any tags.
    pub fn next_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }

    /// The next major version, used as an upper sentinel for dependency
    /// bounds that extend past every known version.
    pub fn next_major(&self) -> Self {
        Self::new(self.major + 1, 0, 0)
    }
}

impl From<(u64, u64, u64)> for Version {
    fn from(tuple: (u64, u64, u64)) -> Self {
        let (major, minor, patch) = tuple;
        Self::new(major, minor, patch)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                // A prerelease sorts before the release it announces.
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
            .then_with(|| self.build.cmp(&other.build))
    }
}

/// Semver precedence for dot-separated prerelease identifiers.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    // Numeric identifiers always have lower precedence.
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

/// Error creating [Version] from an invalid string.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VersionParseError {
    /// The string is not of the form `major.minor.patch[-pre][+build]`.
    #[error("version \"{full_version}\" must contain 3 numbers separated by dots")]
    NotThreeParts {
        /// The full version string that failed to parse.
        full_version: String,
    },
    /// A numeric component failed to parse.
    #[error("cannot parse \"{version_part}\" in \"{full_version}\" as a number")]
    ParseIntError {
        /// The full version string that failed to parse.
        full_version: String,
        /// The component that failed to parse.
        version_part: String,
    },
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numbers, build) = match s.split_once('+') {
            Some((head, build)) => (head, Some(build.to_string())),
            None => (s, None),
        };
        let (numbers, prerelease) = match numbers.split_once('-') {
            Some((head, pre)) => (head, Some(pre.to_string())),
            None => (numbers, None),
        };

        let not_three_parts = || VersionParseError::NotThreeParts {
            full_version: s.to_string(),
        };
        let mut parts = numbers.split('.');
        let next_number = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| VersionParseError::ParseIntError {
                    full_version: s.to_string(),
                    version_part: part.to_string(),
                })
        };
        let major = next_number(parts.next().ok_or_else(not_three_parts)?)?;
        let minor = next_number(parts.next().ok_or_else(not_three_parts)?)?;
        let patch = next_number(parts.next().ok_or_else(not_three_parts)?)?;
        if parts.next().is_some() {
            return Err(not_three_parts());
        }

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}

/// Version of the build tool a package manifest declares.
///
/// Opaque to the solver: containers answer whether a package version is
/// usable with the running tools, and the value itself only shows up in
/// diagnostics.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ToolsVersion(Version);

impl ToolsVersion {
    /// A tools version `major.minor.patch`.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }
}

impl From<Version> for ToolsVersion {
    fn from(version: Version) -> Self {
        Self(version)
    }
}

impl Display for ToolsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display_round_trip() {
        for s in [
            "0.0.0",
            "1.2.3",
            "1.0.0-alpha.1",
            "2.4.6+nightly",
            "1.0.0-rc.1+sha.5114f85",
        ] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("1.two.3".parse::<Version>().is_err());
    }

    #[test]
    fn semver_precedence() {
        let ordered = [
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
            "1.0.0",
            "2.0.0",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn bump_is_strictly_higher() {
        for s in ["0.0.0", "1.2.3", "1.0.0-alpha", "1.0.0-alpha.1"] {
            let version = v(s);
            assert!(version.bump() > version);
        }
        // Nothing released sits between a version and its bump.
        assert!(v("1.2.4-0") <= v("1.2.3").bump());
        assert!(v("1.0.0-alpha.0") <= v("1.0.0-alpha").bump());
    }

    #[test]
    fn lowest_is_below_everything() {
        for s in ["0.0.0", "0.0.0-alpha", "0.0.1", "1.0.0"] {
            assert!(Version::lowest() <= v(s));
        }
    }
}
