// SPDX-License-Identifier: MPL-2.0

//! Dependency requirements, pins, and resolved bindings.

use std::fmt::{self, Display};

use rustc_hash::FxHashMap;

use crate::package::{PackageIdentity, PackageRef, ProductFilter, ResolutionNode};
use crate::version::Version;
use crate::version_set::VersionSet;

/// What a dependency declaration asks for.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Requirement {
    /// A set of acceptable versions.
    VersionSet(VersionSet),
    /// A branch name or commit hash.
    Revision(String),
    /// A local package used in place, outside version selection.
    Unversioned,
}

impl Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionSet(set) => write!(f, "{set}"),
            Self::Revision(revision) => write!(f, "revision {revision}"),
            Self::Unversioned => write!(f, "unversioned"),
        }
    }
}

/// A single dependency declaration: package, requirement, products.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Constraint {
    /// The depended-on package.
    pub package: PackageRef,
    /// What is required of it.
    pub requirement: Requirement,
    /// Which of its products are pulled in.
    pub products: ProductFilter,
}

impl Constraint {
    /// A constraint over a version set.
    pub fn versioned(package: PackageRef, set: VersionSet, products: ProductFilter) -> Self {
        Self {
            package,
            requirement: Requirement::VersionSet(set),
            products,
        }
    }

    /// A constraint pinning a branch or commit.
    pub fn revision(package: PackageRef, revision: impl Into<String>, products: ProductFilter) -> Self {
        Self {
            package,
            requirement: Requirement::Revision(revision.into()),
            products,
        }
    }

    /// A constraint on a local, unversioned package.
    pub fn unversioned(package: PackageRef, products: ProductFilter) -> Self {
        Self {
            package,
            requirement: Requirement::Unversioned,
            products,
        }
    }

    /// The resolution node this constraint puts in play.
    pub fn node(&self) -> ResolutionNode {
        ResolutionNode::Product {
            package: self.package.clone(),
            filter: self.products.clone(),
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.package, self.requirement)
    }
}

/// The version state a package resolves to.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum BoundVersion {
    /// An exact selected version.
    Version(Version),
    /// A branch name or commit hash, for revision overrides.
    Revision(String),
    /// A local package used in place.
    Unversioned,
}

impl Display for BoundVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(version) => write!(f, "{version}"),
            Self::Revision(revision) => write!(f, "{revision}"),
            Self::Unversioned => write!(f, "unversioned"),
        }
    }
}

/// One entry of a successful resolution.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Binding {
    /// The resolved package, after any identity rewriting by the provider.
    pub package: PackageRef,
    /// The selected version, revision or local state.
    pub bound_version: BoundVersion,
    /// The union of products required of the package.
    pub products: ProductFilter,
}

/// A persisted record of a previously chosen version, consulted as a hint.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Pin {
    /// The pinned package.
    pub package: PackageRef,
    /// What was chosen last time.
    pub state: PinState,
}

/// The state a pin records.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PinState {
    /// A released version.
    Version(Version),
    /// A branch, with the commit it pointed at.
    Branch {
        /// The branch name.
        name: String,
        /// The pinned commit hash.
        revision: String,
    },
    /// A bare commit hash.
    Revision(String),
}

/// Pins by package identity.
pub type PinsMap = FxHashMap<PackageIdentity, Pin>;
