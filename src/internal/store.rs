// SPDX-License-Identifier: MPL-2.0

//! Reference storage for all incompatibilities of a solve.

use std::fmt;
use std::ops::Index;

use rustc_hash::FxHashMap;

use crate::internal::incompatibility::Incompatibility;
use crate::package::ResolutionNode;

/// The index of an incompatibility in the store.
///
/// Learned conflicts reference their parents by id, so the whole conflict
/// DAG lives in the store and nothing owns a clause by reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct IncompId(u32);

impl fmt::Debug for IncompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IncompId({})", self.0)
    }
}

/// Append-only arena of incompatibilities plus, per node, the ordered list
/// of incompatibilities mentioning that node.
pub(crate) struct IncompatibilityStore {
    arena: Vec<Incompatibility>,
    by_node: FxHashMap<ResolutionNode, Vec<IncompId>>,
}

impl IncompatibilityStore {
    pub(crate) fn new() -> Self {
        Self {
            arena: Vec::new(),
            by_node: FxHashMap::default(),
        }
    }

    /// Allocate an incompatibility without indexing it by node.
    ///
    /// Conflict resolution allocates intermediate clauses so learned
    /// conflicts can reference them, but only the final clause of a
    /// resolution round is attached to the node index.
    pub(crate) fn alloc(&mut self, incompatibility: Incompatibility) -> IncompId {
        let id = IncompId(self.arena.len() as u32);
        self.arena.push(incompatibility);
        id
    }

    /// Add an allocated incompatibility to the per-node lists, skipping
    /// nodes whose list already holds a structurally equal clause.
    pub(crate) fn attach(&mut self, id: IncompId) {
        let incompatibility = &self.arena[id.0 as usize];
        let nodes: Vec<ResolutionNode> = incompatibility
            .terms()
            .iter()
            .map(|term| term.node().clone())
            .collect();
        for node in nodes {
            let list = self.by_node.entry(node).or_default();
            let duplicate = list
                .iter()
                .any(|&existing| self.arena[existing.0 as usize].same_terms(&self.arena[id.0 as usize]));
            if !duplicate {
                list.push(id);
            }
        }
    }

    /// Allocate and index in one step.
    pub(crate) fn register(&mut self, incompatibility: Incompatibility) -> IncompId {
        log::debug!("incompat: {incompatibility}");
        let id = self.alloc(incompatibility);
        self.attach(id);
        id
    }

    /// Ids of incompatibilities whose term for `node` is positive, in
    /// insertion order.
    pub(crate) fn positive_incompatibilities(&self, node: &ResolutionNode) -> Vec<IncompId> {
        self.by_node
            .get(node)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|&id| {
                        self.arena[id.0 as usize]
                            .get(node)
                            .is_some_and(|term| term.is_positive())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Index<IncompId> for IncompatibilityStore {
    type Output = Incompatibility;

    fn index(&self, id: IncompId) -> &Incompatibility {
        &self.arena[id.0 as usize]
    }
}

// TESTS #######################################################################
