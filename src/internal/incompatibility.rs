// SPDX-License-Identifier: MPL-2.0

//! An incompatibility is a set of terms for different nodes
//! that should never be satisfied all together.

use std::fmt::{self, Display};

use smallvec::SmallVec;

use crate::internal::store::IncompId;
use crate::package::ResolutionNode;
use crate::term::{Term, TermRelation};
use crate::version::{ToolsVersion, Version};
use crate::version_set::VersionSet;

/// An incompatibility usually originates from a package dependency.
/// For example, if `a` at version 1 depends on `b` at version 2, you can
/// never have both terms `a = 1` and `not b = 2` satisfied at the same
/// time in a partial solution: that would mean a solution selected `a` at
/// version 1 but not `b` at version 2, contradicting the dependency.
/// Therefore the set `{ a = 1, not b = 2 }` is an incompatibility.
///
/// Incompatibilities are also derived from two others during conflict
/// resolution; those carry a [Cause::Conflict] pointing at their parents
/// in the store.
#[derive(Debug, Clone)]
pub(crate) struct Incompatibility {
    terms: SmallVec<[Term; 2]>,
    cause: Cause,
}

/// Why an incompatibility holds.
#[derive(Debug, Clone)]
pub(crate) enum Cause {
    /// The synthetic "root is version 1.0.0" constraint.
    Root,
    /// A dependency edge, emitted while inspecting the given node.
    Dependency {
        /// The node whose container produced the edge.
        node: ResolutionNode,
    },
    /// No known version of the node matches its term.
    NoAvailableVersion,
    /// The versions in the term declare a tools version the running tools
    /// cannot load.
    IncompatibleToolsVersion { tools_version: ToolsVersion },
    /// A version-based package depends on a local or revision-based one.
    UnversionedDependency {
        depender: ResolutionNode,
        dependee: ResolutionNode,
    },
    /// Learned during conflict resolution from two prior incompatibilities.
    Conflict {
        /// The incompatibility that was found in conflict.
        conflict: IncompId,
        /// The cause of its most recent satisfier.
        other: IncompId,
    },
}

impl Incompatibility {
    /// Build an incompatibility from terms, merging duplicates per node.
    ///
    /// Learned conflicts drop positive terms on the root node: the root is
    /// always selected, so such terms carry no information and would only
    /// clutter diagnostics.
    pub(crate) fn new(
        terms: impl IntoIterator<Item = Term>,
        root: &ResolutionNode,
        cause: Cause,
    ) -> Self {
        let mut collected: Vec<Term> = terms.into_iter().collect();
        if collected.len() > 1 && matches!(cause, Cause::Conflict { .. }) {
            collected.retain(|term| !(term.is_positive() && term.node() == root));
        }

        let mut merged: SmallVec<[Term; 2]> = SmallVec::new();
        for term in collected {
            match merged.iter_mut().find(|t| t.node() == term.node()) {
                Some(existing) => *existing = existing.intersect(&term),
                None => merged.push(term),
            }
        }
        // A term every selection satisfies adds nothing to the clause.
        merged.retain(|term| !term.is_always());

        Self {
            terms: merged,
            cause,
        }
    }

    /// The initial incompatibility forcing the root to be selected.
    pub(crate) fn root(root: &ResolutionNode, version: Version) -> Self {
        Self {
            terms: smallvec::smallvec![Term::negative(root.clone(), VersionSet::exact(version))],
            cause: Cause::Root,
        }
    }

    /// A dependency edge: `depender` over `depender_set` requires
    /// `dependee` within `dependee_set`.
    pub(crate) fn dependency(
        depender: ResolutionNode,
        depender_set: VersionSet,
        dependee: ResolutionNode,
        dependee_set: VersionSet,
        emitted_by: ResolutionNode,
    ) -> Self {
        // A self-edge tightens the node's own set; keep one term per node.
        if depender == dependee {
            return Self {
                terms: smallvec::smallvec![Term::positive(
                    depender,
                    depender_set.difference(&dependee_set),
                )],
                cause: Cause::Dependency { node: emitted_by },
            };
        }
        Self {
            terms: smallvec::smallvec![
                Term::positive(depender, depender_set),
                Term::negative(dependee, dependee_set),
            ],
            cause: Cause::Dependency { node: emitted_by },
        }
    }

    /// Remember that no known version of the term's node matches it.
    pub(crate) fn no_available_version(term: Term) -> Self {
        debug_assert!(term.is_positive());
        Self {
            terms: smallvec::smallvec![term],
            cause: Cause::NoAvailableVersion,
        }
    }

    /// Remember that the given versions of a node declare an incompatible
    /// tools version.
    pub(crate) fn incompatible_tools_version(
        node: ResolutionNode,
        set: VersionSet,
        tools_version: ToolsVersion,
    ) -> Self {
        Self {
            terms: smallvec::smallvec![Term::positive(node, set)],
            cause: Cause::IncompatibleToolsVersion { tools_version },
        }
    }

    /// Remember that `depender` at `version` lists a non-version dependency
    /// on `dependee` while being version-based itself.
    pub(crate) fn unversioned_dependency(
        depender: ResolutionNode,
        version: Version,
        dependee: ResolutionNode,
    ) -> Self {
        Self {
            terms: smallvec::smallvec![Term::exact(depender.clone(), version)],
            cause: Cause::UnversionedDependency { depender, dependee },
        }
    }

    /// The terms of the incompatibility, in insertion order.
    pub(crate) fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Get the term related to a given node, if it exists.
    pub(crate) fn get(&self, node: &ResolutionNode) -> Option<&Term> {
        self.terms.iter().find(|term| term.node() == node)
    }

    /// Why this incompatibility holds.
    pub(crate) fn cause(&self) -> &Cause {
        &self.cause
    }

    /// The parent ids, for learned conflicts.
    pub(crate) fn conflict_causes(&self) -> Option<(IncompId, IncompId)> {
        match self.cause {
            Cause::Conflict { conflict, other } => Some((conflict, other)),
            _ => None,
        }
    }

    /// Check if an incompatibility marks the end of the algorithm: the
    /// empty clause forbids everything, and a clause on the root node
    /// alone forbids the root itself.
    pub(crate) fn is_failure(&self, root: &ResolutionNode) -> bool {
        match self.terms.as_slice() {
            [] => true,
            [term] => term.node() == root,
            _ => false,
        }
    }

    /// Structural equality of the term sets, used for deduplication.
    pub(crate) fn same_terms(&self, other: &Self) -> bool {
        self.terms.len() == other.terms.len()
            && self
                .terms
                .iter()
                .all(|term| other.terms.iter().any(|t| t == term))
    }

    /// How the accumulated assignments relate to this incompatibility.
    /// `lookup` returns the accumulated term of a node, if any.
    pub(crate) fn relation<'t>(
        &self,
        mut lookup: impl FnMut(&ResolutionNode) -> Option<&'t Term>,
    ) -> Relation {
        let mut relation = Relation::Satisfied;
        for term in &self.terms {
            match lookup(term.node()).map(|accumulated| term.relation_with(accumulated)) {
                Some(TermRelation::Satisfied) => {}
                Some(TermRelation::Contradicted) => {
                    return Relation::Contradicted;
                }
                None | Some(TermRelation::Inconclusive) => {
                    // A node without assignments behaves as the `any` term,
                    // which is inconclusive for every non-trivial term.
                    if let Relation::Satisfied = relation {
                        relation = Relation::AlmostSatisfied(term.clone());
                    } else {
                        relation = Relation::Inconclusive;
                    }
                }
            }
        }
        relation
    }
}

/// How a set of assignments compares to an incompatibility.
#[derive(Debug, Clone)]
pub(crate) enum Relation {
    /// Every term of the incompatibility is satisfied: a conflict.
    Satisfied,
    /// All terms but the carried one are satisfied, and that one is
    /// inconclusive; its inverse can be derived.
    AlmostSatisfied(Term),
    /// At least one term is contradicted; the incompatibility is inactive.
    Contradicted,
    /// Anything else.
    Inconclusive,
}

impl Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "∅");
        }
        let terms: Vec<String> = self.terms.iter().map(Term::to_string).collect();
        write!(f, "{{ {} }}", terms.join(", "))
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PackageRef, ProductFilter};

    fn node(name: &str) -> ResolutionNode {
        ResolutionNode::Product {
            package: PackageRef::remote(&format!("https://example.com/t/{name}")),
            filter: ProductFilter::Everything,
        }
    }

    fn root() -> ResolutionNode {
        ResolutionNode::Root {
            package: PackageRef::synthesized_root(),
        }
    }

    #[test]
    fn terms_on_the_same_node_merge_by_intersection() {
        let range = |a: u64, b: u64| VersionSet::range((a, 0, 0), (b, 0, 0));
        let incompat = Incompatibility::new(
            [
                Term::positive(node("a"), range(1, 3)),
                Term::positive(node("a"), range(2, 4)),
                Term::negative(node("b"), range(1, 2)),
            ],
            &root(),
            Cause::NoAvailableVersion,
        );
        assert_eq!(incompat.terms().len(), 2);
        assert_eq!(
            incompat.get(&node("a")).unwrap().requirement(),
            &range(2, 3)
        );
    }

    #[test]
    fn failure_shapes() {
        let root = root();
        let empty = Incompatibility::new([], &root, Cause::NoAvailableVersion);
        assert!(empty.is_failure(&root));

        let on_root = Incompatibility::root(&root, Version::one());
        assert!(on_root.is_failure(&root));

        let ordinary = Incompatibility::no_available_version(Term::positive(
            node("a"),
            VersionSet::any(),
        ));
        assert!(!ordinary.is_failure(&root));
    }
}
