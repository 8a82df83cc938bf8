// SPDX-License-Identifier: MPL-2.0

//! Dependency resolution for source-based package managers.
//!
//! Given a root package's declared dependencies, the resolver selects,
//! for every transitively reachable package, exactly one version (or
//! branch, revision, or local override) that jointly satisfies all
//! constraints. When that is not possible, it produces a human-readable
//! explanation of the chain of conflicts instead.
//!
//! Version solving is a variant of the PubGrub algorithm: the solver
//! alternates unit propagation and decision making over a growing set of
//! *incompatibilities* (sets of terms that must never hold together),
//! and learns new incompatibilities from every conflict it runs into.
//!
//! # Containers and providers
//!
//! All package metadata flows through a [ContainerProvider]: an
//! asynchronous source of per-package [PackageContainer]s listing known
//! versions, dependency declarations, and tools-version compatibility.
//! The resolver fetches containers concurrently, coalesces duplicate
//! fetches, and prefetches pinned packages, so providers backed by
//! network repositories stay simple.
//!
//! # Basic example
//!
//! The bundled [OfflineContainerProvider] keeps everything in memory:
//!
//! ```
//! use anchorage::{
//!     Constraint, DependencyResolver, OfflineContainerProvider, PackageRef, PinsMap,
//!     ProductFilter, ResolveConfig, VersionSet,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let utils = PackageRef::remote("https://example.com/mona/utils");
//! let mut provider = OfflineContainerProvider::new();
//! provider.add_version(&utils, (1, 2, 0), []);
//! provider.add_version(&utils, (1, 0, 0), []);
//!
//! let resolver = DependencyResolver::new(provider, PinsMap::default(), ResolveConfig::default());
//! let bindings = resolver
//!     .resolve(vec![Constraint::versioned(
//!         utils.clone(),
//!         VersionSet::range((1, 0, 0), (2, 0, 0)),
//!         ProductFilter::Everything,
//!     )])
//!     .await
//!     .unwrap();
//!
//! assert_eq!(bindings.len(), 1);
//! assert_eq!(bindings[0].bound_version.to_string(), "1.2.0");
//! # }
//! ```
//!
//! # Failure reporting
//!
//! When solving proves infeasible, [DependencyResolver::resolve] returns
//! [ResolverError::Unresolvable] carrying a [Diagnostic]: a numbered
//! derivation of the conflict, one step per line, ending in the failure
//! conclusion. Structural problems (the same package required at two
//! revisions, a branch-based dependency reaching a local package) fail
//! fast with their own variants, before version solving even starts.

#![warn(missing_docs)]

mod constraint;
mod container;
mod error;
mod package;
mod provider;
mod report;
mod solver;
mod term;
mod version;
mod version_set;

pub use constraint::{Binding, BoundVersion, Constraint, Pin, PinState, PinsMap, Requirement};
pub use error::{Diagnostic, ResolverError};
pub use package::{PackageIdentity, PackageKind, PackageRef, ProductFilter, ResolutionNode};
pub use provider::{
    ContainerProvider, OfflineContainer, OfflineContainerProvider, OfflineProviderError,
    PackageContainer,
};
pub use solver::{CancellationToken, DependencyResolver, ResolveConfig};
pub use term::Term;
pub use version::{ToolsVersion, Version, VersionParseError};
pub use version_set::{SetRelation, VersionSet};

mod internal;
