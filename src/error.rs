// SPDX-License-Identifier: MPL-2.0

//! Handling resolver errors.

use std::fmt::{self, Display};

use thiserror::Error;

use crate::package::PackageIdentity;

/// The rendered explanation of why version solving failed.
///
/// Built by the diagnostic report builder from the chain of
/// incompatibility derivations; one derivation step per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic(String);

impl Diagnostic {
    pub(crate) fn new(report: String) -> Self {
        Self(report)
    }

    /// The report text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that may occur while solving dependencies.
#[derive(Error, Debug)]
pub enum ResolverError<E: std::error::Error + 'static> {
    /// Version solving proved there is no valid assignment. The diagnostic
    /// explains the chain of conflicts.
    #[error("{0}")]
    Unresolvable(Diagnostic),

    /// The same package is required at two different revisions.
    #[error("package '{package}' is required using two different revision-based requirements ({first} and {second})")]
    ConflictingRevisions {
        /// The doubly-required package.
        package: PackageIdentity,
        /// The revision recorded first.
        first: String,
        /// The conflicting revision.
        second: String,
    },

    /// A revision-based dependency reaches a local, unversioned package.
    #[error("package '{depender}' is required using a revision-based requirement and it depends on local package '{dependee}'")]
    RevisionDependencyContainsLocalPackage {
        /// The revision-based package.
        depender: PackageIdentity,
        /// The local package it depends on.
        dependee: PackageIdentity,
    },

    /// A container could not be loaded. Propagated from the provider
    /// without retrying.
    #[error(transparent)]
    Provider(E),

    /// The cancellation token was tripped.
    #[error("the resolution was cancelled")]
    Cancelled,

    /// The bounds-computation deadline expired.
    #[error("timeout")]
    Timeout,

    /// Something that should be impossible happened. Indicates a bug;
    /// the message carries a dump of the partial solution.
    #[error("internal error: {0}")]
    Internal(String),
}
