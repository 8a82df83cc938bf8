// SPDX-License-Identifier: MPL-2.0

//! Package references and the nodes the resolver reasons about.

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Stable identity of a package, derived from its location.
///
/// Two references to `https://example.com/mona/LinkedList.git` and
/// `/var/checkouts/linkedlist` with the same trailing component compare
/// equal; the identity is the lowercased last path component with any
/// `.git` suffix stripped.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PackageIdentity(Arc<str>);

impl PackageIdentity {
    /// Compute the identity for a location string.
    pub fn from_location(location: &str) -> Self {
        let tail = location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(location);
        let tail = tail.strip_suffix(".git").unwrap_or(tail);
        Self(tail.to_lowercase().into())
    }

    /// Use the given string as identity verbatim.
    pub fn plain(identity: &str) -> Self {
        Self(identity.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a package comes from.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PackageKind {
    /// The synthetic root of the resolution.
    Root,
    /// A package on the local file system, outside version control.
    Local,
    /// A package fetched from a remote repository.
    Remote,
}

/// A reference to a package: identity, kind and location.
///
/// Equality, hashing and ordering go by identity only, so that a package
/// reached through different spellings of its location resolves once.
#[derive(Debug, Clone)]
pub struct PackageRef {
    identity: PackageIdentity,
    kind: PackageKind,
    location: Arc<str>,
}

impl PackageRef {
    /// A remote package at the given location.
    pub fn remote(location: &str) -> Self {
        Self {
            identity: PackageIdentity::from_location(location),
            kind: PackageKind::Remote,
            location: location.into(),
        }
    }

    /// A local package at the given path.
    pub fn local(path: &str) -> Self {
        Self {
            identity: PackageIdentity::from_location(path),
            kind: PackageKind::Local,
            location: path.into(),
        }
    }

    /// The synthetic root reference.
    pub(crate) fn synthesized_root() -> Self {
        Self {
            identity: PackageIdentity::plain("<synthesized-root>"),
            kind: PackageKind::Root,
            location: "<synthesized-root>".into(),
        }
    }

    /// The package identity.
    pub fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    /// The package kind.
    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    /// The location string the reference was created from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// True for the synthetic root reference.
    pub fn is_root(&self) -> bool {
        matches!(self.kind, PackageKind::Root)
    }
}

impl PartialEq for PackageRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for PackageRef {}

impl Hash for PackageRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state)
    }
}

impl PartialOrd for PackageRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.identity.cmp(&other.identity)
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)
    }
}

/// Which products of a package a dependency pulls in.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ProductFilter {
    /// Everything the package offers.
    Everything,
    /// Only the named products. The empty set selects the package version
    /// alone, with none of its products.
    Specific(BTreeSet<String>),
}

impl ProductFilter {
    /// A filter selecting the named products.
    pub fn specific<I, S>(products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Specific(products.into_iter().map(Into::into).collect())
    }

    /// The empty filter: the package version alone.
    pub fn none() -> Self {
        Self::Specific(BTreeSet::new())
    }

    /// Merge another filter into this one.
    pub fn merge(&mut self, other: &ProductFilter) {
        match (&mut *self, other) {
            (Self::Everything, _) => {}
            (_, Self::Everything) => *self = Self::Everything,
            (Self::Specific(mine), Self::Specific(theirs)) => {
                mine.extend(theirs.iter().cloned());
            }
        }
    }
}

impl Display for ProductFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everything => write!(f, "*"),
            Self::Specific(products) => {
                let names: Vec<&str> = products.iter().map(String::as_str).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

/// The granularity at which the resolver reasons.
///
/// A single package may appear under several nodes with distinct product
/// filters, each imposing its own constraints. All variants of a package
/// converge on one version through the lock node, see
/// [version_lock_node](ResolutionNode::version_lock_node).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ResolutionNode {
    /// The synthetic root of the resolution.
    Root {
        /// The root package reference.
        package: PackageRef,
    },
    /// A dependency, restricted to a product filter.
    Product {
        /// The package reference.
        package: PackageRef,
        /// The products pulled from it.
        filter: ProductFilter,
    },
}

impl ResolutionNode {
    /// The node's package reference.
    pub fn package(&self) -> &PackageRef {
        match self {
            Self::Root { package } => package,
            Self::Product { package, .. } => package,
        }
    }

    /// The node's product filter.
    pub fn product_filter(&self) -> ProductFilter {
        match self {
            Self::Root { .. } => ProductFilter::Everything,
            Self::Product { filter, .. } => filter.clone(),
        }
    }

    /// True for the synthetic root node.
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root { .. })
    }

    /// The node all variants of this package lock their version against,
    /// if this node needs one: the variant with the empty product filter.
    pub(crate) fn version_lock_node(&self) -> Option<ResolutionNode> {
        match self {
            Self::Root { .. } => None,
            Self::Product { filter, .. } if *filter == ProductFilter::none() => None,
            Self::Product { package, .. } => Some(Self::Product {
                package: package.clone(),
                filter: ProductFilter::none(),
            }),
        }
    }
}

impl Display for ResolutionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root { .. } => write!(f, "root"),
            Self::Product { package, .. } => write!(f, "'{package}'"),
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_from_location() {
        let https = PackageIdentity::from_location("https://example.com/mona/LinkedList.git");
        let path = PackageIdentity::from_location("/var/checkouts/linkedlist");
        assert_eq!(https, path);
        assert_eq!(https.as_str(), "linkedlist");
    }

    #[test]
    fn refs_compare_by_identity_only() {
        let a = PackageRef::remote("https://example.com/a/Utils.git");
        let b = PackageRef::local("/work/utils");
        assert_eq!(a, b);
    }

    #[test]
    fn product_filter_merge() {
        let mut filter = ProductFilter::specific(["Client"]);
        filter.merge(&ProductFilter::specific(["Server"]));
        assert_eq!(filter, ProductFilter::specific(["Client", "Server"]));
        filter.merge(&ProductFilter::Everything);
        assert_eq!(filter, ProductFilter::Everything);
    }

    #[test]
    fn lock_node_is_the_empty_variant() {
        let package = PackageRef::remote("https://example.com/a/utils");
        let node = ResolutionNode::Product {
            package: package.clone(),
            filter: ProductFilter::Everything,
        };
        let lock = node.version_lock_node().unwrap();
        assert_eq!(lock.product_filter(), ProductFilter::none());
        assert!(lock.version_lock_node().is_none());
    }
}
