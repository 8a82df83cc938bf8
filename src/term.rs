// SPDX-License-Identifier: MPL-2.0

//! A term is the fundamental unit of operation of the solving algorithm.
//! It is a positive or negative expression regarding the versions of one
//! resolution node.

use std::fmt::{self, Display};

use crate::package::ResolutionNode;
use crate::version::Version;
use crate::version_set::VersionSet;

/// A positive or negative statement about the version of a node.
///
/// The positive term `'a' 1.0.0..<2.0.0` holds when a version in that set
/// is selected for `'a'`; the negative term `not 'a' 1.0.0..<2.0.0` holds
/// when the selected version is outside the set, or when no version is
/// selected at all.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Term {
    node: ResolutionNode,
    requirement: VersionSet,
    positive: bool,
}

// Base methods.
impl Term {
    /// A positive term over the given set.
    pub fn positive(node: ResolutionNode, requirement: VersionSet) -> Self {
        Self {
            node,
            requirement,
            positive: true,
        }
    }

    /// A negative term over the given set.
    pub fn negative(node: ResolutionNode, requirement: VersionSet) -> Self {
        Self {
            node,
            requirement,
            positive: false,
        }
    }

    /// A positive term containing exactly that version.
    pub fn exact(node: ResolutionNode, version: Version) -> Self {
        Self::positive(node, VersionSet::exact(version))
    }

    /// The node this term talks about.
    pub fn node(&self) -> &ResolutionNode {
        &self.node
    }

    /// The version set of the term.
    pub fn requirement(&self) -> &VersionSet {
        &self.requirement
    }

    /// Simply check if a term is positive.
    pub fn is_positive(&self) -> bool {
        self.positive
    }

    /// Negate a term. Evaluation of the negated term always returns the
    /// opposite of the evaluation of the original one.
    pub fn inverse(&self) -> Self {
        Self {
            node: self.node.clone(),
            requirement: self.requirement.clone(),
            positive: !self.positive,
        }
    }

    /// A term that no selection can ever satisfy.
    pub(crate) fn is_never(&self) -> bool {
        self.positive && self.requirement.is_empty()
    }

    /// A term every selection satisfies.
    pub(crate) fn is_always(&self) -> bool {
        !self.positive && self.requirement.is_empty()
    }
}

// Set operations with terms.
impl Term {
    /// Compute the intersection of two terms on the same node.
    /// If at least one term is positive, the intersection is also positive.
    pub(crate) fn intersect(&self, other: &Term) -> Term {
        debug_assert_eq!(self.node, other.node);
        let (requirement, positive) = match (self.positive, other.positive) {
            (true, true) => (self.requirement.intersection(&other.requirement), true),
            (true, false) => (self.requirement.difference(&other.requirement), true),
            (false, true) => (other.requirement.difference(&self.requirement), true),
            (false, false) => (self.requirement.union(&other.requirement), false),
        };
        Term {
            node: self.node.clone(),
            requirement,
            positive,
        }
    }

    /// Compute the union of two terms on the same node.
    /// If at least one term is negative, the union is also negative.
    #[cfg(test)]
    pub(crate) fn union(&self, other: &Term) -> Term {
        self.inverse().intersect(&other.inverse()).inverse()
    }

    /// The versions satisfying this term but not the other, or `None` if
    /// every version satisfying this term satisfies the other too.
    pub(crate) fn difference(&self, other: &Term) -> Option<Term> {
        let difference = self.intersect(&other.inverse());
        if difference.is_never() {
            None
        } else {
            Some(difference)
        }
    }

    /// Indicate if this term is a subset of another term.
    /// Just like for sets, t1 is a subset of t2 if and only if t1 ∩ t2 = t1.
    pub(crate) fn satisfies(&self, other: &Term) -> bool {
        self.node == other.node && self.intersect(other) == *self
    }

    /// Check if the accumulated term of a node's assignments satisfies or
    /// contradicts this term. Otherwise the relation is inconclusive.
    pub(crate) fn relation_with(&self, accumulated: &Term) -> TermRelation {
        let intersection = self.intersect(accumulated);
        if intersection == *accumulated {
            TermRelation::Satisfied
        } else if intersection.is_never() {
            TermRelation::Contradicted
        } else {
            TermRelation::Inconclusive
        }
    }
}

/// Describe a relation between the accumulated assignments of a node and a
/// term t.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum TermRelation {
    /// The assignments imply that t must be true.
    Satisfied,
    /// The assignments imply that t must be false.
    Contradicted,
    /// Neither follows from the assignments.
    Inconclusive,
}

impl Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.positive {
            write!(f, "{} {}", self.node, self.requirement)
        } else {
            write!(f, "Not ( {} {} )", self.node, self.requirement)
        }
    }
}

// TESTS #######################################################################
