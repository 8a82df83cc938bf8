// SPDX-License-Identifier: MPL-2.0

//! Concurrent, caching access to package containers, and the per-package
//! view the solver reasons with.
//!
//! The [ContainerCache] coalesces concurrent fetches of the same package:
//! a lookup that races with an in-flight fetch awaits the same cell
//! instead of re-issuing, only the first success is stored, and failures
//! are retried on the next request. The [CachedContainer] wrapper answers
//! the solver's questions at a chosen version: how many versions match a
//! set, which version to try, and which incompatibilities selecting a
//! version introduces.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::OnceCell;

use crate::constraint::{Constraint, PinState, PinsMap, Requirement};
use crate::internal::incompatibility::Incompatibility;
use crate::package::{PackageIdentity, PackageRef, ProductFilter, ResolutionNode};
use crate::provider::{ContainerProvider, PackageContainer};
use crate::term::Term;
use crate::version::Version;
use crate::version_set::VersionSet;

/// A container fetch that went wrong.
#[derive(Debug)]
pub(crate) enum FetchError<E> {
    /// The provider failed; propagated without retrying.
    Provider(E),
    /// The bounds-computation deadline expired.
    Timeout,
}

/// Concurrent map of fetched containers, keyed by package identity.
pub(crate) struct ContainerCache<P: ContainerProvider> {
    provider: P,
    pins: PinsMap,
    skip_update: bool,
    containers: Mutex<FxHashMap<PackageIdentity, Arc<OnceCell<Arc<CachedContainer<P>>>>>>,
}

impl<P: ContainerProvider> ContainerCache<P> {
    pub(crate) fn new(provider: P, pins: PinsMap, skip_update: bool) -> Self {
        Self {
            provider,
            pins,
            skip_update,
            containers: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn pins(&self) -> &PinsMap {
        &self.pins
    }

    /// The container for a package, fetching it on first use. Concurrent
    /// calls for the same identity share one fetch.
    pub(crate) async fn get(
        &self,
        package: &PackageRef,
    ) -> Result<Arc<CachedContainer<P>>, P::Error> {
        let cell = {
            let mut containers = self.containers.lock().expect("container cache poisoned");
            Arc::clone(containers.entry(package.identity().clone()).or_default())
        };
        let container = cell
            .get_or_try_init(|| async {
                log::debug!("fetching container for '{package}'");
                let underlying = self.provider.get_container(package, self.skip_update).await?;
                let pinned_version =
                    self.pins
                        .get(package.identity())
                        .and_then(|pin| match &pin.state {
                            PinState::Version(version) => Some(version.clone()),
                            _ => None,
                        });
                Ok::<_, P::Error>(Arc::new(CachedContainer::new(
                    package.clone(),
                    underlying,
                    pinned_version,
                )))
            })
            .await?;
        Ok(Arc::clone(container))
    }

    /// Forget what cached containers emitted during a previous solve.
    /// Containers outlive a solve call, but the emitted-bounds memo and
    /// the pinned fast-path flag are per-solve state.
    pub(crate) fn reset_session_state(&self) {
        let containers = self.containers.lock().expect("container cache poisoned");
        for cell in containers.values() {
            if let Some(container) = cell.get() {
                container.reset_emitted();
            }
        }
    }

    /// An already fetched container, without triggering a fetch.
    pub(crate) fn cached(&self, identity: &PackageIdentity) -> Option<Arc<CachedContainer<P>>> {
        let containers = self.containers.lock().expect("container cache poisoned");
        containers.get(identity).and_then(|cell| cell.get().cloned())
    }

    /// Start background fetches for the given packages. A later lookup
    /// that sees an in-flight prefetch awaits it instead of re-issuing.
    pub(crate) fn prefetch(cache: &Arc<Self>, packages: impl IntoIterator<Item = PackageRef>) {
        for package in packages {
            let cache = Arc::clone(cache);
            tokio::spawn(async move {
                if let Err(error) = cache.get(&package).await {
                    log::debug!("prefetch of '{package}' failed: {error}");
                }
            });
        }
    }
}

/// What a container has already told the solver.
#[derive(Default)]
struct EmittedBounds {
    pinned_done: bool,
    by_dependency: FxHashMap<PackageIdentity, VersionSet>,
    skipped_bounds_computations: usize,
}

/// Per-package view over a provider container, with memoized metadata.
pub(crate) struct CachedContainer<P: ContainerProvider> {
    package: PackageRef,
    underlying: P::Container,
    pinned_version: Option<Version>,
    /// Known versions, newest first.
    versions: OnceCell<Vec<Version>>,
    dependencies: Mutex<FxHashMap<(Version, ProductFilter), Arc<Vec<Constraint>>>>,
    tools_compatibility: Mutex<FxHashMap<Version, bool>>,
    emitted: Mutex<EmittedBounds>,
}

impl<P: ContainerProvider> CachedContainer<P> {
    fn new(package: PackageRef, underlying: P::Container, pinned_version: Option<Version>) -> Self {
        Self {
            package,
            underlying,
            pinned_version,
            versions: OnceCell::new(),
            dependencies: Mutex::new(FxHashMap::default()),
            tools_compatibility: Mutex::new(FxHashMap::default()),
            emitted: Mutex::new(EmittedBounds::default()),
        }
    }

    /// The provider's container, for operations the wrapper does not
    /// mediate (revision and unversioned dependencies, identity updates).
    pub(crate) fn underlying(&self) -> &P::Container {
        &self.underlying
    }

    fn reset_emitted(&self) {
        *self.emitted.lock().expect("emitted state poisoned") = EmittedBounds::default();
    }

    /// How often the pinned-version fast path avoided a bounds
    /// computation.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn skipped_bounds_computations(&self) -> usize {
        self.emitted
            .lock()
            .expect("emitted state poisoned")
            .skipped_bounds_computations
    }

    /// The version list, if it has already been fetched. The diagnostic
    /// builder uses this to normalize ranges without new fetches.
    pub(crate) fn cached_versions(&self) -> Option<&[Version]> {
        self.versions.get().map(Vec::as_slice)
    }

    /// Known versions, newest first, fetched once.
    pub(crate) async fn versions_descending(&self) -> Result<&[Version], P::Error> {
        let versions = self
            .versions
            .get_or_try_init(|| async {
                let mut versions = self.underlying.reversed_versions().await?;
                // Enforce the order instead of trusting the provider, so
                // the walk below stays deterministic.
                versions.sort_unstable_by(|a, b| b.cmp(a));
                Ok::<_, P::Error>(versions)
            })
            .await?;
        Ok(versions)
    }

    /// How many selectable versions fall in the set. A satisfying pin
    /// counts as exactly one: the pin is the only version that will be
    /// tried.
    pub(crate) async fn version_count(&self, set: &VersionSet) -> Result<usize, P::Error> {
        if let Some(pinned) = &self.pinned_version {
            if set.contains(pinned) {
                return Ok(1);
            }
        }
        Ok(self
            .versions_descending()
            .await?
            .iter()
            .filter(|version| set.contains(version))
            .count())
    }

    /// The version to try for a positive term: the satisfying pin if
    /// there is one, the highest matching known version otherwise.
    pub(crate) async fn best_available_version(
        &self,
        term: &Term,
    ) -> Result<Option<Version>, P::Error> {
        debug_assert!(term.is_positive());
        if let Some(pinned) = &self.pinned_version {
            if term.requirement().contains(pinned) {
                return Ok(Some(pinned.clone()));
            }
        }
        Ok(self
            .versions_descending()
            .await?
            .iter()
            .find(|version| term.requirement().contains(version))
            .cloned())
    }

    /// Dependency declarations at a version, memoized per filter.
    pub(crate) async fn dependencies(
        &self,
        version: &Version,
        products: &ProductFilter,
    ) -> Result<Arc<Vec<Constraint>>, P::Error> {
        let key = (version.clone(), products.clone());
        if let Some(found) = self
            .dependencies
            .lock()
            .expect("dependency cache poisoned")
            .get(&key)
        {
            return Ok(Arc::clone(found));
        }
        let fetched = Arc::new(self.underlying.get_dependencies(version, products).await?);
        let mut dependencies = self.dependencies.lock().expect("dependency cache poisoned");
        Ok(Arc::clone(dependencies.entry(key).or_insert(fetched)))
    }

    async fn tools_compatible(&self, version: &Version) -> bool {
        if let Some(&known) = self
            .tools_compatibility
            .lock()
            .expect("tools cache poisoned")
            .get(version)
        {
            return known;
        }
        let compatible = self.underlying.is_tools_version_compatible(version).await;
        self.tools_compatibility
            .lock()
            .expect("tools cache poisoned")
            .insert(version.clone(), compatible);
        compatible
    }

    /// The incompatibilities selecting `version` for `node` introduces.
    pub(crate) async fn incompatibilities_at(
        &self,
        version: &Version,
        node: &ResolutionNode,
        overridden: &FxHashSet<PackageIdentity>,
        bounds_timeout: Duration,
    ) -> Result<Vec<Incompatibility>, FetchError<P::Error>> {
        // A version the running tools cannot load rules out the whole
        // contiguous run of equally incompatible versions around it.
        if !self.tools_compatible(version).await {
            log::debug!("'{}' {version} has an incompatible tools version", self.package);
            let set = self
                .incompatible_tools_bounds(version)
                .await
                .map_err(FetchError::Provider)?;
            let tools_version = self
                .underlying
                .tools_version(version)
                .await
                .map_err(FetchError::Provider)?;
            return Ok(vec![Incompatibility::incompatible_tools_version(
                node.clone(),
                set,
                tools_version,
            )]);
        }

        let constraints = self
            .dependencies(version, &node.product_filter())
            .await
            .map_err(FetchError::Provider)?;

        // A version-based package must not reach for local or revision
        // dependencies.
        for constraint in constraints.iter() {
            if !matches!(constraint.requirement, Requirement::VersionSet(_)) {
                return Ok(vec![Incompatibility::unversioned_dependency(
                    node.clone(),
                    version.clone(),
                    constraint.node(),
                )]);
            }
        }

        let applicable: Vec<&Constraint> = {
            let emitted = self.emitted.lock().expect("emitted state poisoned");
            constraints
                .iter()
                .filter(|constraint| {
                    if overridden.contains(constraint.package.identity()) {
                        return false;
                    }
                    // A previously emitted bound covering this version
                    // already implies the edge.
                    !emitted
                        .by_dependency
                        .get(constraint.package.identity())
                        .is_some_and(|bound| bound.contains(version))
                })
                .collect()
        };

        let mut incompatibilities = Vec::new();

        let fast_path = {
            let emitted = self.emitted.lock().expect("emitted state poisoned");
            self.pinned_version.as_ref() == Some(version)
                && !emitted.pinned_done
                && emitted.by_dependency.is_empty()
        };
        if fast_path {
            // The pin will be the first decision for this package, so the
            // narrow exact requirement suffices and no bounds are needed.
            let mut emitted = self.emitted.lock().expect("emitted state poisoned");
            emitted.pinned_done = true;
            emitted.skipped_bounds_computations += 1;
            for constraint in &applicable {
                let Requirement::VersionSet(required) = &constraint.requirement else {
                    continue;
                };
                incompatibilities.push(Incompatibility::dependency(
                    node.clone(),
                    VersionSet::exact(version.clone()),
                    constraint.node(),
                    required.clone(),
                    node.clone(),
                ));
            }
        } else {
            let (lower, upper) = self
                .compute_bounds(version, &applicable, &node.product_filter(), bounds_timeout)
                .await?;
            let mut emitted = self.emitted.lock().expect("emitted state poisoned");
            for constraint in &applicable {
                let Requirement::VersionSet(required) = &constraint.requirement else {
                    continue;
                };
                let identity = constraint.package.identity();
                let low = lower.get(identity).cloned().unwrap_or_else(Version::zero);
                let high = upper
                    .get(identity)
                    .cloned()
                    .unwrap_or_else(|| version.next_major());
                let range = VersionSet::range(low, high);
                incompatibilities.push(Incompatibility::dependency(
                    node.clone(),
                    range.clone(),
                    constraint.node(),
                    required.clone(),
                    node.clone(),
                ));
                match emitted.by_dependency.get_mut(identity) {
                    Some(existing) => *existing = existing.union(&range),
                    None => {
                        emitted.by_dependency.insert(identity.clone(), range);
                    }
                }
            }
        }

        // All product variants of this package must agree on its version.
        if let Some(lock) = node.version_lock_node() {
            incompatibilities.push(Incompatibility::dependency(
                node.clone(),
                VersionSet::exact(version.clone()),
                lock,
                VersionSet::exact(version.clone()),
                node.clone(),
            ));
        }

        Ok(incompatibilities)
    }

    /// The contiguous run of tools-incompatible versions around `version`,
    /// as a half-open range. The edges are widened to `0.0.0` below and
    /// the next major above when the run reaches the end of the known
    /// version list, which reads better in diagnostics.
    async fn incompatible_tools_bounds(&self, version: &Version) -> Result<VersionSet, P::Error> {
        let ascending: Vec<Version> = self
            .versions_descending()
            .await?
            .iter()
            .rev()
            .cloned()
            .collect();
        let Some(position) = ascending.iter().position(|v| v == version) else {
            return Ok(VersionSet::exact(version.clone()));
        };

        let mut upper = None;
        let mut highest_incompatible = version.clone();
        for v in &ascending[position + 1..] {
            if self.tools_compatible(v).await {
                upper = Some(v.clone());
                break;
            }
            highest_incompatible = v.clone();
        }
        let upper = upper.unwrap_or_else(|| highest_incompatible.next_major());

        let mut lower = Version::zero();
        let mut lowest_incompatible = version.clone();
        for v in ascending[..position].iter().rev() {
            if self.tools_compatible(v).await {
                lower = lowest_incompatible.clone();
                break;
            }
            lowest_incompatible = v.clone();
        }

        Ok(VersionSet::range(lower, upper))
    }

    /// For each dependency, the maximal half-open interval around
    /// `from` over which the edge is stable: every version in it is
    /// tools-compatible and lists the dependency with an identical
    /// requirement. The two directions walk concurrently; missing sides
    /// are filled with sentinels by the caller.
    async fn compute_bounds(
        &self,
        from: &Version,
        constraints: &[&Constraint],
        products: &ProductFilter,
        deadline: Duration,
    ) -> Result<
        (
            FxHashMap<PackageIdentity, Version>,
            FxHashMap<PackageIdentity, Version>,
        ),
        FetchError<P::Error>,
    > {
        let ascending: Vec<Version> = self
            .versions_descending()
            .await
            .map_err(FetchError::Provider)?
            .iter()
            .rev()
            .cloned()
            .collect();
        let position = ascending.iter().position(|v| v == from);

        let unchanged = |dependencies: &[Constraint], constraint: &Constraint| {
            dependencies.iter().any(|dependency| {
                dependency.package.identity() == constraint.package.identity()
                    && dependency.requirement == constraint.requirement
            })
        };

        let lower_walk = async {
            let mut bounds: FxHashMap<PackageIdentity, Version> = FxHashMap::default();
            if let Some(position) = position {
                let mut previous = from.clone();
                for v in ascending[..position].iter().rev() {
                    if bounds.len() == constraints.len() {
                        break;
                    }
                    if !self.tools_compatible(v).await {
                        for constraint in constraints {
                            bounds
                                .entry(constraint.package.identity().clone())
                                .or_insert_with(|| previous.clone());
                        }
                        break;
                    }
                    let dependencies = self.dependencies(v, products).await?;
                    for constraint in constraints {
                        if bounds.contains_key(constraint.package.identity()) {
                            continue;
                        }
                        if !unchanged(&dependencies, constraint) {
                            bounds
                                .insert(constraint.package.identity().clone(), previous.clone());
                        }
                    }
                    previous = v.clone();
                }
            }
            Ok::<_, P::Error>(bounds)
        };

        let upper_walk = async {
            let mut bounds: FxHashMap<PackageIdentity, Version> = FxHashMap::default();
            if let Some(position) = position {
                for v in &ascending[position + 1..] {
                    if bounds.len() == constraints.len() {
                        break;
                    }
                    if !self.tools_compatible(v).await {
                        for constraint in constraints {
                            bounds
                                .entry(constraint.package.identity().clone())
                                .or_insert_with(|| v.clone());
                        }
                        break;
                    }
                    let dependencies = self.dependencies(v, products).await?;
                    for constraint in constraints {
                        if bounds.contains_key(constraint.package.identity()) {
                            continue;
                        }
                        if !unchanged(&dependencies, constraint) {
                            bounds.insert(constraint.package.identity().clone(), v.clone());
                        }
                    }
                }
            }
            Ok::<_, P::Error>(bounds)
        };

        match tokio::time::timeout(deadline, futures::future::try_join(lower_walk, upper_walk))
            .await
        {
            Err(_elapsed) => Err(FetchError::Timeout),
            Ok(Err(error)) => Err(FetchError::Provider(error)),
            Ok(Ok((lower, upper))) => Ok((lower, upper)),
        }
    }
}

// TESTS #######################################################################
