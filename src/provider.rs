// SPDX-License-Identifier: MPL-2.0

//! The container provider contract, and an in-memory implementation.
//!
//! A [ContainerProvider] hands out [PackageContainer]s: per-package views
//! of the metadata the resolver needs, typically backed by a checkout of
//! the package's repository. Providers may hit the network; the resolver
//! fetches them concurrently and caches them, so implementations only
//! need to be safe under concurrent invocation for distinct packages.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::constraint::{BoundVersion, Constraint};
use crate::package::{PackageIdentity, PackageRef, ProductFilter};
use crate::version::{ToolsVersion, Version};

/// Hands out per-package metadata views.
#[async_trait]
pub trait ContainerProvider: Send + Sync + 'static {
    /// The container type this provider produces.
    type Container: PackageContainer<Error = Self::Error>;
    /// The error produced when a container cannot be loaded.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the container for a package. May clone or fetch repositories;
    /// with `skip_update` set, a provider should serve whatever it already
    /// has on disk instead of refreshing it.
    async fn get_container(
        &self,
        package: &PackageRef,
        skip_update: bool,
    ) -> Result<Self::Container, Self::Error>;
}

/// Per-package metadata: published versions, dependencies, tool support.
#[async_trait]
pub trait PackageContainer: Send + Sync + 'static {
    /// The error produced when metadata cannot be read.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Known versions, newest first. Finite and deterministic.
    async fn reversed_versions(&self) -> Result<Vec<Version>, Self::Error>;

    /// Dependency declarations of the given version, restricted to a
    /// product filter.
    async fn get_dependencies(
        &self,
        version: &Version,
        products: &ProductFilter,
    ) -> Result<Vec<Constraint>, Self::Error>;

    /// Dependency declarations at a branch or commit.
    async fn get_revision_dependencies(
        &self,
        revision: &str,
        products: &ProductFilter,
    ) -> Result<Vec<Constraint>, Self::Error>;

    /// Dependency declarations of a local, unversioned package.
    async fn get_unversioned_dependencies(
        &self,
        products: &ProductFilter,
    ) -> Result<Vec<Constraint>, Self::Error>;

    /// Whether the manifest at the given version can be loaded by the
    /// running tools.
    async fn is_tools_version_compatible(&self, version: &Version) -> bool;

    /// The tools version the manifest at the given version declares.
    async fn tools_version(&self, version: &Version) -> Result<ToolsVersion, Self::Error>;

    /// The package reference to report for this container once a version
    /// settles. Providers may rewrite a previously ambiguous identity.
    async fn updated_identifier(&self, bound: &BoundVersion)
        -> Result<PackageRef, Self::Error>;
}

/// Error produced by the [OfflineContainerProvider].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfflineProviderError {
    /// The package was never registered.
    #[error("unknown package '{0}'")]
    UnknownPackage(PackageIdentity),
    /// The version was never registered.
    #[error("no dependency information for '{package}' at {version}")]
    UnknownVersion {
        /// The queried package.
        package: PackageIdentity,
        /// The queried version.
        version: Version,
    },
    /// The revision was never registered.
    #[error("no dependency information for '{package}' at revision {revision}")]
    UnknownRevision {
        /// The queried package.
        package: PackageIdentity,
        /// The queried revision.
        revision: String,
    },
}

#[derive(Debug, Clone)]
struct VersionRecord {
    dependencies: Vec<Constraint>,
    tools_version: ToolsVersion,
    tools_compatible: bool,
}

/// Everything the offline provider knows about one package.
#[derive(Debug, Clone, Default)]
struct PackageRecord {
    versions: BTreeMap<Version, VersionRecord>,
    revisions: FxHashMap<String, Vec<Constraint>>,
    unversioned: Vec<Constraint>,
}

/// A [ContainerProvider] with all dependency information in memory.
///
/// Versions are picked newest first, and product filters are ignored: the
/// registered dependency lists apply to every filter. Useful for tests
/// and for trying the resolver out.
#[derive(Debug, Clone, Default)]
pub struct OfflineContainerProvider {
    packages: FxHashMap<PackageIdentity, (PackageRef, PackageRecord)>,
}

impl OfflineContainerProvider {
    /// Creates an empty provider with no packages.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, package: &PackageRef) -> &mut PackageRecord {
        &mut self
            .packages
            .entry(package.identity().clone())
            .or_insert_with(|| (package.clone(), PackageRecord::default()))
            .1
    }

    /// Registers a version of a package and its dependencies, compatible
    /// with the running tools. Subsequent calls for the same version
    /// replace the previous registration.
    pub fn add_version<I>(&mut self, package: &PackageRef, version: impl Into<Version>, dependencies: I)
    where
        I: IntoIterator<Item = Constraint>,
    {
        self.record(package).versions.insert(
            version.into(),
            VersionRecord {
                dependencies: dependencies.into_iter().collect(),
                tools_version: ToolsVersion::new(1, 0, 0),
                tools_compatible: true,
            },
        );
    }

    /// Marks a registered version as requiring the given tools version,
    /// incompatible with the running tools.
    pub fn set_incompatible_tools_version(
        &mut self,
        package: &PackageRef,
        version: impl Into<Version>,
        tools_version: ToolsVersion,
    ) {
        let version = version.into();
        if let Some(record) = self.record(package).versions.get_mut(&version) {
            record.tools_version = tools_version;
            record.tools_compatible = false;
        }
    }

    /// Registers the dependencies of a package at a branch or commit.
    pub fn add_revision<I>(&mut self, package: &PackageRef, revision: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = Constraint>,
    {
        self.record(package)
            .revisions
            .insert(revision.into(), dependencies.into_iter().collect());
    }

    /// Registers the dependencies of a local, unversioned package.
    pub fn set_unversioned_dependencies<I>(&mut self, package: &PackageRef, dependencies: I)
    where
        I: IntoIterator<Item = Constraint>,
    {
        self.record(package).unversioned = dependencies.into_iter().collect();
    }
}

#[async_trait]
impl ContainerProvider for OfflineContainerProvider {
    type Container = OfflineContainer;
    type Error = OfflineProviderError;

    async fn get_container(
        &self,
        package: &PackageRef,
        _skip_update: bool,
    ) -> Result<Self::Container, Self::Error> {
        let (reference, record) = self
            .packages
            .get(package.identity())
            .ok_or_else(|| OfflineProviderError::UnknownPackage(package.identity().clone()))?;
        Ok(OfflineContainer {
            package: reference.clone(),
            record: Arc::new(record.clone()),
        })
    }
}

/// The container type of the [OfflineContainerProvider].
#[derive(Debug, Clone)]
pub struct OfflineContainer {
    package: PackageRef,
    record: Arc<PackageRecord>,
}

#[async_trait]
impl PackageContainer for OfflineContainer {
    type Error = OfflineProviderError;

    async fn reversed_versions(&self) -> Result<Vec<Version>, Self::Error> {
        Ok(self.record.versions.keys().rev().cloned().collect())
    }

    async fn get_dependencies(
        &self,
        version: &Version,
        _products: &ProductFilter,
    ) -> Result<Vec<Constraint>, Self::Error> {
        self.record
            .versions
            .get(version)
            .map(|record| record.dependencies.clone())
            .ok_or_else(|| OfflineProviderError::UnknownVersion {
                package: self.package.identity().clone(),
                version: version.clone(),
            })
    }

    async fn get_revision_dependencies(
        &self,
        revision: &str,
        _products: &ProductFilter,
    ) -> Result<Vec<Constraint>, Self::Error> {
        self.record
            .revisions
            .get(revision)
            .cloned()
            .ok_or_else(|| OfflineProviderError::UnknownRevision {
                package: self.package.identity().clone(),
                revision: revision.to_string(),
            })
    }

    async fn get_unversioned_dependencies(
        &self,
        _products: &ProductFilter,
    ) -> Result<Vec<Constraint>, Self::Error> {
        Ok(self.record.unversioned.clone())
    }

    async fn is_tools_version_compatible(&self, version: &Version) -> bool {
        self.record
            .versions
            .get(version)
            .map_or(false, |record| record.tools_compatible)
    }

    async fn tools_version(&self, version: &Version) -> Result<ToolsVersion, Self::Error> {
        self.record
            .versions
            .get(version)
            .map(|record| record.tools_version.clone())
            .ok_or_else(|| OfflineProviderError::UnknownVersion {
                package: self.package.identity().clone(),
                version: version.clone(),
            })
    }

    async fn updated_identifier(
        &self,
        _bound: &BoundVersion,
    ) -> Result<PackageRef, Self::Error> {
        Ok(self.package.clone())
    }
}
