// SPDX-License-Identifier: MPL-2.0

//! Core state and functions of the solving algorithm: unit propagation
//! and conflict-driven clause learning.

use std::hash::BuildHasherDefault;

use indexmap::IndexSet;

use crate::internal::incompatibility::{Cause, Incompatibility, Relation};
use crate::internal::partial_solution::PartialSolution;
use crate::internal::store::{IncompId, IncompatibilityStore};
use crate::package::ResolutionNode;
use crate::term::Term;
use crate::version::Version;

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<rustc_hash::FxHasher>>;

/// Why the core loop stopped making progress.
#[derive(Debug)]
pub(crate) enum CoreError {
    /// Solving proved infeasibility; the id is the terminal incompatibility
    /// to build the diagnostic from.
    Unresolvable(IncompId),
    /// An internal invariant broke. Carries a dump of the solver state.
    Internal(String),
}

/// Current state of the solving algorithm.
pub(crate) struct State {
    root: ResolutionNode,
    /// The store is the reference storage for all incompatibilities.
    pub(crate) store: IncompatibilityStore,
    /// The partial solution under construction.
    pub(crate) solution: PartialSolution,
    /// Work set for `unit_propagation`, kept here to reuse the allocation.
    changed: FxIndexSet<ResolutionNode>,
}

impl State {
    /// Initialization: seed the store with the clause forcing the root to
    /// be selected at the given version.
    pub(crate) fn init(root: ResolutionNode, root_version: Version) -> Self {
        let mut store = IncompatibilityStore::new();
        store.register(Incompatibility::root(&root, root_version));
        Self {
            root,
            store,
            solution: PartialSolution::empty(),
            changed: FxIndexSet::default(),
        }
    }

    /// The synthetic root node.
    pub(crate) fn root(&self) -> &ResolutionNode {
        &self.root
    }

    /// Add an incompatibility to the store and the per-node index.
    pub(crate) fn add_incompatibility(&mut self, incompatibility: Incompatibility) -> IncompId {
        self.store.register(incompatibility)
    }

    /// Unit propagation is the core mechanism of the solving algorithm.
    ///
    /// Starting from the seed node, repeatedly evaluate the positive
    /// incompatibilities of every node in the work set, newest first.
    /// An almost-satisfied incompatibility forces the inverse of its
    /// unsatisfied term; a satisfied one is a conflict and goes through
    /// conflict resolution.
    pub(crate) fn unit_propagation(&mut self, seed: ResolutionNode) -> Result<(), CoreError> {
        self.changed.clear();
        self.changed.insert(seed);
        while let Some(node) = self.changed.shift_remove_index(0) {
            // Snapshot the ids: conflict resolution below appends to the
            // index, and newly learned clauses get their own pass.
            let ids = self.store.positive_incompatibilities(&node);
            let mut conflict = None;
            // Evaluate the newest incompatibilities first.
            for &id in ids.iter().rev() {
                let relation = self.store[id].relation(|n| self.solution.accumulated(n));
                match relation {
                    Relation::Satisfied => {
                        log::info!(
                            "start conflict resolution, incompat satisfied: {}",
                            self.store[id]
                        );
                        conflict = Some(id);
                        break;
                    }
                    Relation::AlmostSatisfied(term) => {
                        self.changed.insert(term.node().clone());
                        self.solution.derive(term.inverse(), id);
                    }
                    Relation::Contradicted | Relation::Inconclusive => {}
                }
            }

            if let Some(id) = conflict {
                let root_cause = self.resolve_conflict(id)?;
                // The learned clause must almost-satisfy the backtracked
                // solution; anything else is a bug in the algorithm.
                match self.store[root_cause].relation(|n| self.solution.accumulated(n)) {
                    Relation::AlmostSatisfied(term) => {
                        self.changed.clear();
                        self.changed.insert(term.node().clone());
                        self.solution.derive(term.inverse(), root_cause);
                    }
                    _ => {
                        return Err(CoreError::Internal(format!(
                            "expected root cause {} to almost satisfy the partial solution\n{}",
                            self.store[root_cause], self.solution
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Conflict resolution: walk satisfiers backwards, learning the prior
    /// cause at each step, until the learned clause can flip a decision.
    /// Returns the learned root cause, with the solution backtracked to
    /// the level where that clause almost-satisfies it.
    fn resolve_conflict(&mut self, conflict: IncompId) -> Result<IncompId, CoreError> {
        let mut current = conflict;
        let mut created = false;
        loop {
            if self.store[current].is_failure(&self.root) {
                return Err(CoreError::Unresolvable(current));
            }

            let terms: Vec<Term> = self.store[current].terms().to_vec();
            let mut most_recent: Option<(Term, crate::internal::partial_solution::SatisfierInfo)> =
                None;
            let mut difference: Option<Term> = None;
            // Level 1 is the root decision; nothing backtracks past it.
            let mut previous_level: u32 = 1;

            for term in &terms {
                let satisfier = self
                    .solution
                    .satisfier(term)
                    .ok_or_else(|| self.unsatisfied_term_error(term))?;
                match &most_recent {
                    None => most_recent = Some((term.clone(), satisfier)),
                    Some((_, best)) if best.index < satisfier.index => {
                        previous_level = previous_level.max(best.decision_level);
                        most_recent = Some((term.clone(), satisfier));
                        difference = None;
                    }
                    Some(_) => {
                        previous_level = previous_level.max(satisfier.decision_level);
                    }
                }

                // When the satisfier only partially covers the term, the
                // uncovered part behaves like an extra term of the clause.
                let leads = most_recent
                    .as_ref()
                    .is_some_and(|(most_recent_term, _)| most_recent_term == term);
                if leads {
                    let (_, satisfier) = most_recent.as_ref().expect("just matched");
                    difference = satisfier.term.difference(term);
                    if let Some(diff) = &difference {
                        let diff_satisfier = self
                            .solution
                            .satisfier(&diff.inverse())
                            .ok_or_else(|| self.unsatisfied_term_error(diff))?;
                        previous_level = previous_level.max(diff_satisfier.decision_level);
                    }
                }
            }

            let (most_recent_term, most_recent_satisfier) = most_recent.ok_or_else(|| {
                CoreError::Internal(format!(
                    "conflict resolution reached an empty clause that is not a failure\n{}",
                    self.solution
                ))
            })?;

            if previous_level < most_recent_satisfier.decision_level
                || most_recent_satisfier.cause.is_none()
            {
                self.solution.backtrack(previous_level);
                if created {
                    self.store.attach(current);
                }
                log::info!("learned: {}", self.store[current]);
                return Ok(current);
            }

            // The rule of resolution: merge the current clause with the
            // cause of the most recent satisfier, dropping the pivot node.
            let cause = most_recent_satisfier
                .cause
                .expect("checked above to be a derivation");
            let mut new_terms: Vec<Term> = terms
                .iter()
                .filter(|term| **term != most_recent_term)
                .cloned()
                .collect();
            new_terms.extend(
                self.store[cause]
                    .terms()
                    .iter()
                    .filter(|term| term.node() != most_recent_satisfier.term.node())
                    .cloned(),
            );
            if let Some(diff) = &difference {
                new_terms.push(diff.inverse());
            }
            let prior = Incompatibility::new(
                new_terms,
                &self.root,
                Cause::Conflict {
                    conflict: current,
                    other: cause,
                },
            );
            log::debug!("prior cause: {prior}");
            current = self.store.alloc(prior);
            created = true;
        }
    }

    fn unsatisfied_term_error(&self, term: &Term) -> CoreError {
        CoreError::Internal(format!(
            "expected the partial solution to satisfy {term}\n{}",
            self.solution
        ))
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PackageRef, ProductFilter};
    use crate::version_set::VersionSet;

    fn node(name: &str) -> ResolutionNode {
        ResolutionNode::Product {
            package: PackageRef::remote(&format!("https://example.com/t/{name}")),
            filter: ProductFilter::Everything,
        }
    }

    fn root_node() -> ResolutionNode {
        ResolutionNode::Root {
            package: PackageRef::synthesized_root(),
        }
    }

    fn range(a: u64, b: u64) -> VersionSet {
        VersionSet::range((a, 0, 0), (b, 0, 0))
    }

    #[test]
    fn propagation_derives_dependencies_of_the_root() {
        let mut state = State::init(root_node(), Version::one());
        state.add_incompatibility(Incompatibility::dependency(
            root_node(),
            VersionSet::exact(Version::one()),
            node("a"),
            range(1, 2),
            root_node(),
        ));
        state.solution.decide(root_node(), Version::one());
        state.unit_propagation(root_node()).unwrap();

        let accumulated = state.solution.accumulated(&node("a")).unwrap();
        assert!(accumulated.is_positive());
        assert_eq!(accumulated.requirement(), &range(1, 2));
    }

    #[test]
    fn conflicting_requirements_bubble_up_as_unresolvable() {
        let mut state = State::init(root_node(), Version::one());
        state.add_incompatibility(Incompatibility::dependency(
            root_node(),
            VersionSet::exact(Version::one()),
            node("a"),
            range(1, 2),
            root_node(),
        ));
        state.add_incompatibility(Incompatibility::dependency(
            root_node(),
            VersionSet::exact(Version::one()),
            node("a"),
            range(2, 3),
            root_node(),
        ));
        state.solution.decide(root_node(), Version::one());
        let result = state.unit_propagation(root_node());
        assert!(matches!(result, Err(CoreError::Unresolvable(_))));
    }
}
