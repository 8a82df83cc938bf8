// SPDX-License-Identifier: MPL-2.0

//! Version sets are constraints defining sets of versions.
//!
//! Concretely, a set is a sorted sequence of disjoint half-open intervals
//! `[low, high)`, with an absent `high` standing for "unbounded above".
//! Every constructor and operation normalizes down to that canonical form,
//! so two sets are equal exactly when they contain the same versions.
//!
//! The building blocks are:
//!  - [empty()](VersionSet::empty): the empty set
//!  - [any()](VersionSet::any): the set of all possible versions
//!  - [exact(v)](VersionSet::exact): the set containing only the version v
//!  - [range(v1, v2)](VersionSet::range): the set defined by `v1 <= versions < v2`
//!  - [ranges(pairs)](VersionSet::ranges): a union of such ranges

use std::fmt::{self, Display};

use smallvec::SmallVec;

use crate::version::Version;

/// A half-open interval `[low, high)`; `None` means unbounded above.
type Segment = (Version, Option<Version>);

/// A set of versions, closed under union, intersection, complement and
/// difference.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VersionSet {
    segments: SmallVec<[Segment; 1]>,
}

// Constructors
impl VersionSet {
    /// Empty set of versions.
    pub fn empty() -> Self {
        Self {
            segments: SmallVec::new(),
        }
    }

    /// Set of all possible versions.
    pub fn any() -> Self {
        Self {
            segments: smallvec::smallvec![(Version::lowest(), None)],
        }
    }

    /// Set containing exactly one version.
    pub fn exact(v: impl Into<Version>) -> Self {
        let v = v.into();
        let upper = v.bump();
        Self {
            segments: smallvec::smallvec![(v, Some(upper))],
        }
    }

    /// Set of versions greater or equal to `low` but strictly lower than
    /// `high`. An inverted pair yields the empty set.
    pub fn range(low: impl Into<Version>, high: impl Into<Version>) -> Self {
        let (low, high) = (low.into(), high.into());
        if low >= high {
            return Self::empty();
        }
        Self {
            segments: smallvec::smallvec![(low, Some(high))],
        }
    }

    /// Union of several `[low, high)` ranges, normalized.
    pub fn ranges(pairs: impl IntoIterator<Item = (Version, Version)>) -> Self {
        Self::normalize(
            pairs
                .into_iter()
                .filter(|(low, high)| low < high)
                .map(|(low, high)| (low, Some(high)))
                .collect(),
        )
    }

    /// Set of all versions higher or equal to some version.
    pub fn higher_than(v: impl Into<Version>) -> Self {
        Self {
            segments: smallvec::smallvec![(v.into(), None)],
        }
    }

    /// Set of all versions strictly lower than some version.
    pub fn strictly_lower_than(v: impl Into<Version>) -> Self {
        Self::range(Version::lowest(), v.into())
    }

    /// Sort, drop empty segments, and fuse overlapping or adjacent ones.
    fn normalize(mut segments: Vec<Segment>) -> Self {
        segments.retain(|(low, high)| high.as_ref().map_or(true, |h| low < h));
        segments.sort_by(|a, b| a.0.cmp(&b.0));
        let mut fused: SmallVec<[Segment; 1]> = SmallVec::new();
        for (low, high) in segments {
            match fused.last_mut() {
                // Half-open intervals touching at the boundary fuse too.
                Some((_, prev_high)) if prev_high.as_ref().map_or(true, |h| *h >= low) => {
                    *prev_high = match (prev_high.take(), high) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        _ => None,
                    };
                }
                _ => fused.push((low, high)),
            }
        }
        Self { segments: fused }
    }
}

// Set operations.
impl VersionSet {
    /// Returns true if this set contains the specified version.
    pub fn contains(&self, v: &Version) -> bool {
        self.segments
            .iter()
            .any(|(low, high)| v >= low && high.as_ref().map_or(true, |h| v < h))
    }

    /// Returns true if this is the empty set.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The only version in the set, if the set is a singleton.
    pub fn as_exact(&self) -> Option<&Version> {
        match self.segments.as_slice() {
            [(low, Some(high))] if *high == low.bump() => Some(low),
            _ => None,
        }
    }

    /// Computes the intersection of two sets of versions.
    pub fn intersection(&self, other: &Self) -> Self {
        let mut segments: SmallVec<[Segment; 1]> = SmallVec::new();
        let mut left = self.segments.iter().peekable();
        let mut right = other.segments.iter().peekable();
        loop {
            let (low, l_end, r_end) = match (left.peek(), right.peek()) {
                (Some((l_low, l_high)), Some((r_low, r_high))) => (
                    l_low.max(r_low).clone(),
                    (*l_high).clone(),
                    (*r_high).clone(),
                ),
                _ => break,
            };
            let high = match (&l_end, &r_end) {
                (Some(a), Some(b)) => Some(a.min(b).clone()),
                (Some(a), None) => Some(a.clone()),
                (None, Some(b)) => Some(b.clone()),
                (None, None) => None,
            };
            if high.as_ref().map_or(true, |h| low < *h) {
                segments.push((low, high));
            }
            // Advance whichever interval ends first.
            match (l_end, r_end) {
                (Some(a), Some(b)) => match a.cmp(&b) {
                    std::cmp::Ordering::Less => {
                        left.next();
                    }
                    std::cmp::Ordering::Greater => {
                        right.next();
                    }
                    std::cmp::Ordering::Equal => {
                        left.next();
                        right.next();
                    }
                },
                (Some(_), None) => {
                    left.next();
                }
                (None, Some(_)) => {
                    right.next();
                }
                (None, None) => break,
            }
        }
        Self { segments }
    }

    /// Computes the union of two sets of versions; adjacent and overlapping
    /// ranges fuse.
    pub fn union(&self, other: &Self) -> Self {
        Self::normalize(
            self.segments
                .iter()
                .chain(other.segments.iter())
                .cloned()
                .collect(),
        )
    }

    /// Returns the complement, within the universe of all versions.
    pub fn complement(&self) -> Self {
        let mut segments: SmallVec<[Segment; 1]> = SmallVec::new();
        let mut start = Some(Version::lowest());
        for (low, high) in &self.segments {
            let from = match start.take() {
                Some(s) => s,
                None => break,
            };
            if from < *low {
                segments.push((from, Some(low.clone())));
            }
            start = high.clone();
        }
        if let Some(from) = start {
            segments.push((from, None));
        }
        Self { segments }
    }

    /// Versions in `self` but not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        self.intersection(&other.complement())
    }

    /// How this set relates to another one.
    pub fn relation(&self, other: &Self) -> SetRelation {
        let common = self.intersection(other);
        if &common == self {
            SetRelation::Subset
        } else if common.is_empty() {
            SetRelation::Disjoint
        } else {
            SetRelation::Overlap
        }
    }

    /// Iterate the `[low, high)` segments in order.
    pub(crate) fn segments(&self) -> impl Iterator<Item = (&Version, Option<&Version>)> {
        self.segments.iter().map(|(low, high)| (low, high.as_ref()))
    }
}

/// How one version set relates to another.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SetRelation {
    /// Every version of the first set is in the second.
    Subset,
    /// The sets share no version.
    Disjoint,
    /// The sets share some versions but neither contains the other.
    Overlap,
}

// REPORT ######################################################################

impl Display for VersionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "∅");
        }
        let lowest = Version::lowest();
        let segments: Vec<String> = self
            .segments
            .iter()
            .map(|(low, high)| match high {
                None if *low == lowest => "*".to_string(),
                None => format!(">={low}"),
                Some(high) if *high == low.bump() => format!("{low}"),
                Some(high) if *low == lowest => format!("<{high}"),
                Some(high) => format!("{low}..<{high}"),
            })
            .collect();
        write!(f, "{}", segments.join(", "))
    }
}

// TESTS #######################################################################

#[cfg(test)]
pub mod tests {
    use super::*;
    use proptest::prelude::*;

    fn version_strategy() -> impl Strategy<Value = Version> {
        (0u64..5, 0u64..5, 0u64..5).prop_map(|(major, minor, patch)| {
            Version::new(major, minor, patch)
        })
    }

    pub fn strategy() -> impl Strategy<Value = VersionSet> {
        prop::collection::vec(version_strategy(), 0..6).prop_map(|mut bounds| {
            bounds.sort();
            bounds.dedup();
            let mut set = VersionSet::empty();
            let mut iter = bounds.into_iter();
            while let Some(low) = iter.next() {
                let piece = match iter.next() {
                    Some(high) => VersionSet::range(low, high),
                    None => VersionSet::higher_than(low),
                };
                set = set.union(&piece);
            }
            set
        })
    }

    #[test]
    fn inverted_range_is_empty() {
        let set = VersionSet::range((2, 0, 0), (1, 0, 0));
        assert!(set.is_empty());
        assert!(VersionSet::range((1, 0, 0), (1, 0, 0)).is_empty());
    }

    #[test]
    fn adjacent_ranges_fuse() {
        let left = VersionSet::range((1, 0, 0), (2, 0, 0));
        let right = VersionSet::range((2, 0, 0), (3, 0, 0));
        assert_eq!(
            left.union(&right),
            VersionSet::range((1, 0, 0), (3, 0, 0))
        );
    }

    #[test]
    fn exact_is_contained_in_enclosing_range() {
        let range = VersionSet::range((1, 0, 0), (2, 0, 0));
        assert_eq!(
            VersionSet::exact((1, 5, 0)).relation(&range),
            SetRelation::Subset
        );
        assert_eq!(
            VersionSet::exact((2, 0, 0)).relation(&range),
            SetRelation::Disjoint
        );
        assert!(range.contains(&Version::new(1, 0, 0)));
        assert!(!range.contains(&Version::new(2, 0, 0)));
    }

    #[test]
    fn prereleases_of_the_lower_bound_are_outside() {
        let range = VersionSet::range((1, 0, 0), (2, 0, 0));
        assert!(!range.contains(&Version::new(1, 0, 0).with_prerelease("alpha")));
        assert!(range.complement().contains(&Version::new(1, 0, 0).with_prerelease("alpha")));
    }

    #[test]
    fn display_forms() {
        assert_eq!(VersionSet::any().to_string(), "*");
        assert_eq!(VersionSet::empty().to_string(), "∅");
        assert_eq!(VersionSet::exact((1, 2, 3)).to_string(), "1.2.3");
        assert_eq!(
            VersionSet::range((1, 0, 0), (2, 0, 0)).to_string(),
            "1.0.0..<2.0.0"
        );
        assert_eq!(VersionSet::higher_than((1, 0, 0)).to_string(), ">=1.0.0");
    }

    proptest! {

        #[test]
        fn complement_partitions_the_universe(set in strategy()) {
            prop_assert_eq!(set.intersection(&set.complement()), VersionSet::empty());
            prop_assert_eq!(set.union(&set.complement()), VersionSet::any());
        }

        #[test]
        fn difference_and_intersection_partition(a in strategy(), b in strategy()) {
            prop_assert_eq!(a.difference(&b).union(&a.intersection(&b)), a);
        }

        #[test]
        fn union_is_commutative(a in strategy(), b in strategy()) {
            prop_assert_eq!(a.union(&b), b.union(&a));
        }

        #[test]
        fn intersection_with_any_is_identity(set in strategy()) {
            prop_assert_eq!(set.intersection(&VersionSet::any()), set);
        }

        #[test]
        fn double_complement_is_identity(set in strategy()) {
            prop_assert_eq!(set.complement().complement(), set);
        }

        #[test]
        fn relation_matches_set_operations(a in strategy(), b in strategy()) {
            match a.relation(&b) {
                SetRelation::Subset => prop_assert_eq!(a.intersection(&b), a),
                SetRelation::Disjoint => prop_assert!(a.intersection(&b).is_empty()),
                SetRelation::Overlap => {
                    prop_assert_ne!(a.intersection(&b), a.clone());
                    prop_assert!(!a.intersection(&b).is_empty());
                }
            }
        }

        #[test]
        fn contains_agrees_with_complement(set in strategy(), v in version_strategy()) {
            prop_assert_ne!(set.contains(&v), set.complement().contains(&v));
        }
    }
}
