// SPDX-License-Identifier: MPL-2.0

//! The dependency resolver.
//!
//! Given the root package's constraints, [DependencyResolver::resolve]
//! selects one version (or branch, revision, or local override) for every
//! transitively reachable package such that all constraints hold, or
//! explains why no such selection exists.
//!
//! Local and revision-based constraints are taken out of version solving
//! up front by the input processor and reported as overrides; everything
//! else goes through unit propagation, decision making and conflict
//! resolution until all positive terms are decided.

use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashSet;

use crate::constraint::{Binding, BoundVersion, Constraint, PinState, PinsMap, Requirement};
use crate::container::{ContainerCache, FetchError};
use crate::error::{Diagnostic, ResolverError};
use crate::internal::core::{CoreError, State};
use crate::internal::incompatibility::{Incompatibility, Relation};
use crate::package::{PackageIdentity, PackageRef, ProductFilter, ResolutionNode};
use crate::provider::{ContainerProvider, PackageContainer};
use crate::report::DiagnosticReportBuilder;
use crate::term::Term;
use crate::version::Version;
use crate::version_set::VersionSet;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<rustc_hash::FxHasher>>;

/// A shared flag that aborts an in-flight resolution when tripped.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Pending joins finish as cancelled and the resolve
    /// call returns [ResolverError::Cancelled].
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the token was tripped.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Knobs for a resolution run.
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    /// Fetch containers of pinned packages in the background at solve
    /// entry instead of on first use.
    pub prefetch: bool,
    /// Ask providers to serve existing checkouts without refreshing them.
    pub skip_update: bool,
    /// Deadline for one parallel bounds computation; expiry is fatal.
    pub bounds_timeout: Duration,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            prefetch: true,
            skip_update: false,
            bounds_timeout: Duration::from_secs(60),
        }
    }
}

/// A package fixed by a local path or a branch/revision constraint,
/// excluded from version selection.
#[derive(Debug, Clone)]
struct Override {
    bound_version: BoundVersion,
    products: ProductFilter,
}

type Overrides = FxIndexMap<PackageRef, Override>;

/// The PubGrub-style dependency resolver.
pub struct DependencyResolver<P: ContainerProvider> {
    cache: Arc<ContainerCache<P>>,
    config: ResolveConfig,
    cancellation: CancellationToken,
}

impl<P: ContainerProvider> DependencyResolver<P> {
    /// A resolver over the given provider and pin records.
    pub fn new(provider: P, pins: PinsMap, config: ResolveConfig) -> Self {
        let cache = Arc::new(ContainerCache::new(provider, pins, config.skip_update));
        Self {
            cache,
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Use the given cancellation token for subsequent resolve calls.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Resolve the given root constraints into bindings, sorted by
    /// package identity with overridden packages at the end.
    pub async fn resolve(
        &self,
        constraints: Vec<Constraint>,
    ) -> Result<Vec<Binding>, ResolverError<P::Error>> {
        let root = ResolutionNode::Root {
            package: PackageRef::synthesized_root(),
        };
        let mut state = State::init(root.clone(), Version::one());
        self.cache.reset_session_state();

        let (overrides, root_incompatibilities) =
            self.process_inputs(&root, constraints).await?;
        for incompatibility in root_incompatibilities {
            state.add_incompatibility(incompatibility);
        }

        if self.config.prefetch {
            let pinned: Vec<PackageRef> = self
                .cache
                .pins()
                .values()
                .filter(|pin| !overrides.contains_key(&pin.package))
                .map(|pin| pin.package.clone())
                .collect();
            ContainerCache::prefetch(&self.cache, pinned);
        }

        let overridden: FxHashSet<PackageIdentity> = overrides
            .keys()
            .map(|package| package.identity().clone())
            .collect();

        state.solution.decide(root.clone(), Version::one());

        let mut next = root.clone();
        loop {
            if self.cancellation.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            if let Err(error) = state.unit_propagation(next.clone()) {
                return Err(self.core_error(&state, error));
            }
            match self.make_decision(&mut state, &overridden).await? {
                Some(node) => next = node,
                None => break,
            }
        }

        self.assemble(&state, &overrides).await
    }

    /// Two-phase intake of the root constraints: local packages first,
    /// then branch/revision constraints, leaving only version-based
    /// constraints for the solver proper.
    async fn process_inputs(
        &self,
        root: &ResolutionNode,
        constraints: Vec<Constraint>,
    ) -> Result<(Overrides, Vec<Incompatibility>), ResolverError<P::Error>> {
        if self.cancellation.is_cancelled() {
            return Err(ResolverError::Cancelled);
        }
        // Start fetching everything we can already see.
        ContainerCache::prefetch(
            &self.cache,
            constraints.iter().map(|constraint| constraint.package.clone()),
        );

        let mut working: FxIndexSet<Constraint> = constraints.into_iter().collect();
        let mut overrides: Overrides = FxIndexMap::default();
        // Version-based children of overridden packages, with the node
        // that declared them.
        let mut version_based: Vec<(ResolutionNode, Vec<(ResolutionNode, VersionSet)>)> =
            Vec::new();

        // Phase 1: local, unversioned packages.
        while let Some(position) = working
            .iter()
            .position(|constraint| matches!(constraint.requirement, Requirement::Unversioned))
        {
            if self.cancellation.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            let constraint = working.shift_remove_index(position).expect("just found");
            match overrides.get_mut(&constraint.package) {
                Some(existing) => {
                    debug_assert!(matches!(existing.bound_version, BoundVersion::Unversioned));
                    existing.products.merge(&constraint.products);
                }
                None => {
                    overrides.insert(
                        constraint.package.clone(),
                        Override {
                            bound_version: BoundVersion::Unversioned,
                            products: constraint.products.clone(),
                        },
                    );
                }
            }

            let node = constraint.node();
            let container = self
                .cache
                .get(&constraint.package)
                .await
                .map_err(ResolverError::Provider)?;
            let dependencies = container
                .underlying()
                .get_unversioned_dependencies(&constraint.products)
                .await
                .map_err(ResolverError::Provider)?;
            let mut versioned_children = Vec::new();
            for dependency in dependencies {
                match &dependency.requirement {
                    Requirement::VersionSet(set) => {
                        versioned_children.push((dependency.node(), set.clone()));
                    }
                    Requirement::Revision(_) | Requirement::Unversioned => {
                        // An already overridden package is not re-enqueued;
                        // this is also the cycle guard.
                        if !overrides.contains_key(&dependency.package) {
                            working.insert(dependency);
                        }
                    }
                }
            }
            if !versioned_children.is_empty() {
                version_based.push((node, versioned_children));
            }
        }

        // Phase 2: branch and commit constraints.
        while let Some(position) = working
            .iter()
            .position(|constraint| matches!(constraint.requirement, Requirement::Revision(_)))
        {
            if self.cancellation.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            let constraint = working.shift_remove_index(position).expect("just found");
            let Requirement::Revision(revision) = &constraint.requirement else {
                unreachable!("position matched a revision requirement");
            };
            let revision = revision.clone();

            match overrides.get_mut(&constraint.package) {
                Some(existing) => match &existing.bound_version {
                    // A local override takes precedence over the revision.
                    BoundVersion::Unversioned => continue,
                    BoundVersion::Revision(existing_revision) => {
                        if *existing_revision != revision {
                            return Err(ResolverError::ConflictingRevisions {
                                package: constraint.package.identity().clone(),
                                first: existing_revision.clone(),
                                second: revision,
                            });
                        }
                        // Seen again at the same revision: only the
                        // products are news. Not refetching is the cycle
                        // guard among revision-based packages.
                        existing.products.merge(&constraint.products);
                        continue;
                    }
                    BoundVersion::Version(_) => {
                        return Err(ResolverError::Internal(format!(
                            "package '{}' was version-overridden during input processing",
                            constraint.package
                        )));
                    }
                },
                None => {
                    overrides.insert(
                        constraint.package.clone(),
                        Override {
                            bound_version: BoundVersion::Revision(revision.clone()),
                            products: constraint.products.clone(),
                        },
                    );
                }
            }

            // If a pin records this exact branch, fetch dependencies at
            // the pinned commit instead of the branch head.
            let mut revision_for_dependencies = revision.clone();
            if let Some(pin) = self.cache.pins().get(constraint.package.identity()) {
                if let PinState::Branch {
                    name,
                    revision: pinned_commit,
                } = &pin.state
                {
                    if *name == revision {
                        revision_for_dependencies = pinned_commit.clone();
                    }
                }
            }

            let node = constraint.node();
            let container = self
                .cache
                .get(&constraint.package)
                .await
                .map_err(ResolverError::Provider)?;
            let dependencies = container
                .underlying()
                .get_revision_dependencies(&revision_for_dependencies, &constraint.products)
                .await
                .map_err(ResolverError::Provider)?;
            let mut versioned_children = Vec::new();
            for dependency in dependencies {
                match &dependency.requirement {
                    Requirement::VersionSet(set) => {
                        versioned_children.push((dependency.node(), set.clone()));
                    }
                    Requirement::Revision(_) => {
                        working.insert(dependency);
                    }
                    Requirement::Unversioned => {
                        return Err(ResolverError::RevisionDependencyContainsLocalPackage {
                            depender: constraint.package.identity().clone(),
                            dependee: dependency.package.identity().clone(),
                        });
                    }
                }
            }
            if !versioned_children.is_empty() {
                version_based.push((node, versioned_children));
            }
        }

        // Whatever remains is version-based and constrains the root
        // directly; overridden packages' version-based children do too,
        // since their parents are always present.
        let mut root_incompatibilities = Vec::new();
        let root_set = VersionSet::exact(Version::one());
        for constraint in working {
            if overrides.contains_key(&constraint.package) {
                continue;
            }
            let Requirement::VersionSet(set) = &constraint.requirement else {
                return Err(ResolverError::Internal(format!(
                    "constraint '{constraint}' survived input processing"
                )));
            };
            root_incompatibilities.push(Incompatibility::dependency(
                root.clone(),
                root_set.clone(),
                constraint.node(),
                set.clone(),
                root.clone(),
            ));
        }
        for (parent, children) in version_based {
            for (child, set) in children {
                if overrides.contains_key(child.package()) {
                    continue;
                }
                root_incompatibilities.push(Incompatibility::dependency(
                    root.clone(),
                    root_set.clone(),
                    child,
                    set,
                    parent.clone(),
                ));
            }
        }

        Ok((overrides, root_incompatibilities))
    }

    /// Pick the most constrained undecided term, find its best version,
    /// register that version's incompatibilities, and commit the decision
    /// unless one of them already conflicts.
    async fn make_decision(
        &self,
        state: &mut State,
        overridden: &FxHashSet<PackageIdentity>,
    ) -> Result<Option<ResolutionNode>, ResolverError<P::Error>> {
        let undecided = state
            .solution
            .undecided(|package| overridden.contains(package.identity()));
        if undecided.is_empty() {
            return Ok(None);
        }
        if self.cancellation.is_cancelled() {
            return Err(ResolverError::Cancelled);
        }

        // Query candidate counts for all undecided terms concurrently and
        // pick the smallest: failing fast on the most constrained package
        // keeps conflicts shallow.
        let counts = futures::future::join_all(undecided.iter().map(|term| async {
            let container = self.cache.get(term.node().package()).await?;
            container.version_count(term.requirement()).await
        }))
        .await;
        let counts = self.collect_parallel(counts)?;

        // First minimum wins, so ties keep insertion order.
        let mut chosen = 0;
        for (index, count) in counts.iter().enumerate() {
            if *count < counts[chosen] {
                chosen = index;
            }
        }
        let term = &undecided[chosen];
        let node = term.node().clone();

        let container = self
            .cache
            .get(node.package())
            .await
            .map_err(ResolverError::Provider)?;
        let Some(version) = container
            .best_available_version(term)
            .await
            .map_err(ResolverError::Provider)?
        else {
            log::info!("no versions of {node} match {}", term.requirement());
            state.add_incompatibility(Incompatibility::no_available_version(term.clone()));
            return Ok(Some(node));
        };

        let incompatibilities = container
            .incompatibilities_at(&version, &node, overridden, self.config.bounds_timeout)
            .await
            .map_err(|error| match error {
                FetchError::Provider(error) => ResolverError::Provider(error),
                FetchError::Timeout => ResolverError::Timeout,
            })?;

        // Register everything, and only commit the decision if none of
        // the new incompatibilities is satisfied once the decision is
        // assumed; otherwise propagation will derive the negation.
        let assumed = Term::exact(node.clone(), version.clone());
        let mut have_conflict = false;
        for incompatibility in incompatibilities {
            if !have_conflict {
                let relation = incompatibility.relation(|n| {
                    if n == &node {
                        Some(&assumed)
                    } else {
                        state.solution.accumulated(n)
                    }
                });
                have_conflict = matches!(relation, Relation::Satisfied);
            }
            state.add_incompatibility(incompatibility);
        }

        if have_conflict {
            log::info!("not deciding {node} @ {version} because of a conflict");
        } else {
            state.solution.decide(node.clone(), version);
        }
        Ok(Some(node))
    }

    /// Flatten decisions into bindings, rewrite identities, union product
    /// filters, sort, and append the overridden packages.
    async fn assemble(
        &self,
        state: &State,
        overrides: &Overrides,
    ) -> Result<Vec<Binding>, ResolverError<P::Error>> {
        let mut flattened: FxIndexMap<PackageRef, (BoundVersion, ProductFilter)> =
            FxIndexMap::default();
        for (node, version) in state.solution.decisions_in_order() {
            if node.is_root() {
                continue;
            }
            let container = self
                .cache
                .get(node.package())
                .await
                .map_err(ResolverError::Provider)?;
            let bound = BoundVersion::Version(version);
            let updated = container
                .underlying()
                .updated_identifier(&bound)
                .await
                .map_err(ResolverError::Provider)?;
            match flattened.get_mut(&updated) {
                Some((existing, products)) => {
                    if *existing != bound {
                        return Err(ResolverError::Internal(format!(
                            "conflicting versions for '{updated}' in the final assignment"
                        )));
                    }
                    products.merge(&node.product_filter());
                }
                None => {
                    flattened.insert(updated, (bound, node.product_filter()));
                }
            }
        }

        let mut bindings: Vec<Binding> = flattened
            .into_iter()
            .map(|(package, (bound_version, products))| Binding {
                package,
                bound_version,
                products,
            })
            .collect();
        bindings.sort_by(|a, b| a.package.identity().cmp(b.package.identity()));

        let mut overridden = Vec::with_capacity(overrides.len());
        for (package, override_record) in overrides {
            let container = self
                .cache
                .get(package)
                .await
                .map_err(ResolverError::Provider)?;
            let updated = container
                .underlying()
                .updated_identifier(&override_record.bound_version)
                .await
                .map_err(ResolverError::Provider)?;
            overridden.push(Binding {
                package: updated,
                bound_version: override_record.bound_version.clone(),
                products: override_record.products.clone(),
            });
        }
        overridden.sort_by(|a, b| a.package.identity().cmp(b.package.identity()));
        bindings.extend(overridden);

        Ok(bindings)
    }

    /// Surface the first error of a parallel batch; the rest are logged.
    fn collect_parallel<T>(
        &self,
        results: Vec<Result<T, P::Error>>,
    ) -> Result<Vec<T>, ResolverError<P::Error>> {
        let mut values = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err(error) if first_error.is_none() => first_error = Some(error),
                Err(error) => log::debug!("further error in parallel batch: {error}"),
            }
        }
        match first_error {
            Some(error) => Err(ResolverError::Provider(error)),
            None => Ok(values),
        }
    }

    fn core_error(&self, state: &State, error: CoreError) -> ResolverError<P::Error> {
        match error {
            CoreError::Unresolvable(root_cause) => {
                let report = DiagnosticReportBuilder::build(
                    state.root(),
                    &state.store,
                    &self.cache,
                    root_cause,
                );
                ResolverError::Unresolvable(Diagnostic::new(report))
            }
            CoreError::Internal(message) => ResolverError::Internal(message),
        }
    }
}
