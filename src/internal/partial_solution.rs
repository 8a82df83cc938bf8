// SPDX-License-Identifier: MPL-2.0

//! The partial solution is the ordered log of decisions and derivations
//! the algorithm has made so far, with per-node accumulated terms.

use std::fmt::{self, Display};
use std::hash::BuildHasherDefault;

use rustc_hash::FxHashMap;

use crate::internal::store::IncompId;
use crate::package::{PackageRef, ResolutionNode};
use crate::term::Term;
use crate::version::Version;

type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;

/// An assignment is either a decision, fixing a node to one exact version,
/// or a derivation, a term inferred from an incompatibility given prior
/// assignments. Derivations record the incompatibility they came from,
/// called their cause.
#[derive(Debug, Clone)]
pub(crate) struct Assignment {
    term: Term,
    decision_level: u32,
    cause: Option<IncompId>,
}

impl Assignment {
    /// The assignment as a term: an exact positive term for decisions, the
    /// derived term otherwise.
    pub(crate) fn term(&self) -> &Term {
        &self.term
    }

    /// The count of decisions at or before this assignment.
    pub(crate) fn decision_level(&self) -> u32 {
        self.decision_level
    }

    /// The incompatibility a derivation came from; `None` for decisions.
    pub(crate) fn cause(&self) -> Option<IncompId> {
        self.cause
    }

    pub(crate) fn is_decision(&self) -> bool {
        self.cause.is_none()
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            None => write!(f, "decision (level {}): {}", self.decision_level, self.term),
            Some(cause) => write!(
                f,
                "derivation (level {}, cause {:?}): {}",
                self.decision_level, cause, self.term
            ),
        }
    }
}

/// Where a term first became satisfied in the assignment log.
#[derive(Debug, Clone)]
pub(crate) struct SatisfierInfo {
    /// Position of the satisfying assignment in the log.
    pub(crate) index: usize,
    /// Decision level of that assignment.
    pub(crate) decision_level: u32,
    /// Its cause, `None` when it is a decision.
    pub(crate) cause: Option<IncompId>,
    /// The assignment's own term.
    pub(crate) term: Term,
}

/// The ordered assignment log plus, per node, the intersection of all its
/// assigned terms.
pub(crate) struct PartialSolution {
    assignments: Vec<Assignment>,
    decisions: FxHashMap<ResolutionNode, Version>,
    accumulated: FxIndexMap<ResolutionNode, Term>,
    decision_level: u32,
}

impl PartialSolution {
    /// Initialize an empty partial solution.
    pub(crate) fn empty() -> Self {
        Self {
            assignments: Vec::new(),
            decisions: FxHashMap::default(),
            accumulated: FxIndexMap::default(),
            decision_level: 0,
        }
    }

    /// Add a decision fixing `node` to exactly `version`.
    pub(crate) fn decide(&mut self, node: ResolutionNode, version: Version) {
        let term = Term::exact(node.clone(), version.clone());
        debug_assert!(
            self.is_valid_decision(&term),
            "{term} contradicts a prior assignment"
        );
        self.decision_level += 1;
        log::info!("decide (level {}): {} @ {}", self.decision_level, node, version);
        self.accumulate(&term);
        self.assignments.push(Assignment {
            term,
            decision_level: self.decision_level,
            cause: None,
        });
        self.decisions.insert(node, version);
    }

    /// Add a derivation of `term` caused by an incompatibility.
    pub(crate) fn derive(&mut self, term: Term, cause: IncompId) {
        log::debug!("derive: {term}");
        self.accumulate(&term);
        self.assignments.push(Assignment {
            term,
            decision_level: self.decision_level,
            cause: Some(cause),
        });
    }

    fn accumulate(&mut self, term: &Term) {
        match self.accumulated.get_mut(term.node()) {
            Some(existing) => *existing = existing.intersect(term),
            None => {
                self.accumulated.insert(term.node().clone(), term.clone());
            }
        }
    }

    /// Intersection of all assigned terms for `node`, if any.
    pub(crate) fn accumulated(&self, node: &ResolutionNode) -> Option<&Term> {
        self.accumulated.get(node)
    }

    /// The decided version of `node`, if a decision was made.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn decision(&self, node: &ResolutionNode) -> Option<&Version> {
        self.decisions.get(node)
    }

    /// The current decision level: the number of decisions made.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn decision_level(&self) -> u32 {
        self.decision_level
    }

    /// All decisions in the order they were made.
    pub(crate) fn decisions_in_order(&self) -> Vec<(ResolutionNode, Version)> {
        self.assignments
            .iter()
            .filter(|assignment| assignment.is_decision())
            .filter_map(|assignment| {
                let node = assignment.term().node().clone();
                let version = self.decisions.get(&node)?.clone();
                Some((node, version))
            })
            .collect()
    }

    /// A decision term is valid when it satisfies every assignment already
    /// made for its node.
    fn is_valid_decision(&self, term: &Term) -> bool {
        self.assignments
            .iter()
            .filter(|assignment| assignment.term().node() == term.node())
            .all(|assignment| term.satisfies(assignment.term()))
    }

    /// Positive accumulated terms of nodes without a decision and whose
    /// package is not overridden: the candidates for the next decision.
    pub(crate) fn undecided(
        &self,
        mut is_overridden: impl FnMut(&PackageRef) -> bool,
    ) -> Vec<Term> {
        self.accumulated
            .iter()
            .filter(|(node, term)| {
                term.is_positive()
                    && !self.decisions.contains_key(*node)
                    && !is_overridden(node.package())
            })
            .map(|(_, term)| term.clone())
            .collect()
    }

    /// The earliest assignment such that `term` is satisfied by the log up
    /// to and including it. Returns `None` when the log never satisfies the
    /// term, which callers treat as an internal invariant violation.
    pub(crate) fn satisfier(&self, term: &Term) -> Option<SatisfierInfo> {
        let mut running: Option<Term> = None;
        for (index, assignment) in self.assignments.iter().enumerate() {
            if assignment.term().node() != term.node() {
                continue;
            }
            let accumulated = match running.take() {
                Some(prior) => prior.intersect(assignment.term()),
                None => assignment.term().clone(),
            };
            if accumulated.satisfies(term) {
                return Some(SatisfierInfo {
                    index,
                    decision_level: assignment.decision_level(),
                    cause: assignment.cause(),
                    term: assignment.term().clone(),
                });
            }
            running = Some(accumulated);
        }
        None
    }

    /// Truncate to the longest prefix whose assignments all have a level
    /// at or below `level`, and rebuild the accumulated state.
    pub(crate) fn backtrack(&mut self, level: u32) {
        log::info!("backtrack to level {level}");
        let cutoff = self
            .assignments
            .iter()
            .position(|assignment| assignment.decision_level() > level)
            .unwrap_or(self.assignments.len());
        self.assignments.truncate(cutoff);

        self.decisions.clear();
        self.accumulated.clear();
        self.decision_level = 0;
        let rebuilt: Vec<Assignment> = std::mem::take(&mut self.assignments);
        for assignment in &rebuilt {
            self.accumulate(assignment.term());
            if assignment.is_decision() {
                self.decision_level = assignment.decision_level();
                if let Some(version) = assignment.term().requirement().as_exact() {
                    self.decisions
                        .insert(assignment.term().node().clone(), version.clone());
                }
            }
        }
        self.assignments = rebuilt;
    }
}

impl Display for PartialSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "decision level: {}", self.decision_level)?;
        for assignment in &self.assignments {
            writeln!(f, "  {assignment}")?;
        }
        Ok(())
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

    fn range(a: u64, b: u64) -> VersionSet {
        VersionSet::range((a, 0, 0), (b, 0, 0))
    }

    fn dummy_cause() -> IncompId {
        // Ids are opaque; fabricate one through a throwaway store.
        let mut store = crate::internal::store::IncompatibilityStore::new();
        store.alloc(crate::internal::incompatibility::Incompatibility::new(
            [],
            &ResolutionNode::Root {
                package: PackageRef::synthesized_root(),
            },
            crate::internal::incompatibility::Cause::NoAvailableVersion,
        ))
    }

    #[test]
    fn accumulated_terms_intersect() {
        let mut solution = PartialSolution::empty();
        let cause = dummy_cause();
        solution.derive(Term::positive(node("a"), range(1, 3)), cause);
        solution.derive(Term::positive(node("a"), range(2, 4)), cause);
        assert_eq!(
            solution.accumulated(&node("a")).unwrap().requirement(),
            &range(2, 3)
        );
    }

    #[test]
    fn satisfier_finds_the_earliest_prefix() {
        let mut solution = PartialSolution::empty();
        let cause = dummy_cause();
        solution.derive(Term::positive(node("a"), range(1, 4)), cause);
        solution.derive(Term::positive(node("a"), range(1, 2)), cause);
        solution.derive(Term::positive(node("a"), range(1, 2)), cause);

        let target = Term::positive(node("a"), range(0, 3));
        assert_eq!(solution.satisfier(&target).unwrap().index, 0);
        let narrow = Term::positive(node("a"), range(1, 2));
        assert_eq!(solution.satisfier(&narrow).unwrap().index, 1);
    }

    #[test]
    fn backtrack_truncates_and_rebuilds() {
        let mut solution = PartialSolution::empty();
        let cause = dummy_cause();
        solution.derive(Term::positive(node("a"), range(1, 3)), cause);
        solution.decide(node("a"), Version::new(1, 0, 0));
        solution.derive(Term::positive(node("b"), range(1, 2)), cause);
        solution.decide(node("b"), Version::new(1, 0, 0));
        assert_eq!(solution.decision_level(), 2);

        solution.backtrack(1);
        assert_eq!(solution.decision_level(), 1);
        assert!(solution.decision(&node("a")).is_some());
        assert!(solution.decision(&node("b")).is_none());
        assert!(solution.accumulated(&node("b")).is_none());
    }

    #[test]
    fn undecided_skips_decided_and_overridden() {
        let mut solution = PartialSolution::empty();
        let cause = dummy_cause();
        let overridden = PackageRef::remote("https://example.com/t/c");
        solution.derive(Term::positive(node("a"), range(1, 2)), cause);
        solution.derive(Term::positive(node("b"), range(1, 2)), cause);
        solution.derive(Term::positive(node("c"), range(1, 2)), cause);
        solution.decide(node("a"), Version::new(1, 0, 0));

        let undecided = solution.undecided(|package| *package == overridden);
        let nodes: Vec<_> = undecided.iter().map(|term| term.node().clone()).collect();
        assert_eq!(nodes, vec![node("b")]);
    }
}
