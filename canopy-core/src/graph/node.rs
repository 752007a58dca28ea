//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Every cell, derived value, observer and owner is one [`Node`] stored in
//! the arena and addressed by a generational [`NodeId`].

use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Unique identifier for a node in the dependency graph.
///
/// `index` addresses an arena slot; `generation` distinguishes the live
/// occupant of that slot from earlier ones, so a handle that outlived its
/// node never aliases a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot of this node.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this node was allocated.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (cell). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Cell,

    /// A derived node. These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An observer node. These are leaves of the graph.
    /// They have dependencies but no dependents (they produce side effects, not values).
    Observer,

    /// A disposal scope. Owns other nodes, takes no part in propagation.
    Owner,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. Something upstream changed,
    /// but we have not yet verified if the actual input values are different.
    MaybeDirty,

    /// The node definitely needs to recompute. A direct input has changed.
    Dirty,
}

/// Type-erased body of a derived value or an observer.
pub(crate) trait Computation {
    /// Runs the body once. Returns `true` when the produced value differs
    /// from the previously cached one.
    fn evaluate(&self) -> Result<bool>;

    /// Drops the body and everything it captured.
    fn release(&self);
}

pub(crate) type Cleanup = Box<dyn FnOnce()>;
pub(crate) type ErrorHandler = Rc<dyn Fn(&Error)>;

/// Something a node owns. Kept in one list so disposal can undo
/// registrations in exact reverse order.
pub(crate) enum Owned {
    Child(NodeId),
    Cleanup(Cleanup),
}

/// A node in the dependency graph.
pub(crate) struct Node {
    kind: NodeKind,
    dirty: DirtyState,

    /// Creation order. Observers queued in the same pass run in this order.
    seq: u64,

    /// Nodes that this node read during its most recent evaluation.
    dependencies: SmallVec<[NodeId; 4]>,

    /// Nodes that read this node during their most recent evaluation.
    dependents: IndexSet<NodeId>,

    /// Disposal parent.
    owner: Option<NodeId>,

    /// Child nodes and cleanups, in registration order.
    owned: Vec<Owned>,

    error_handlers: Vec<ErrorHandler>,
    computation: Option<Rc<dyn Computation>>,
    disposing: bool,
}

impl Node {
    pub(crate) fn new(
        kind: NodeKind,
        seq: u64,
        owner: Option<NodeId>,
        computation: Option<Rc<dyn Computation>>,
    ) -> Self {
        Self {
            kind,
            dirty: match kind {
                NodeKind::Cell | NodeKind::Owner => DirtyState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Derived | NodeKind::Observer => DirtyState::Dirty,
            },
            seq,
            dependencies: SmallVec::new(),
            dependents: IndexSet::new(),
            owner,
            owned: Vec::new(),
            error_handlers: Vec::new(),
            computation,
            disposing: false,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub(crate) fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty. Never downgrades `Dirty`.
    pub(crate) fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) {
        if !self.dependencies.contains(&node_id) {
            self.dependencies.push(node_id);
        }
    }

    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.retain(|id| *id != node_id);
    }

    pub(crate) fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Removes a dependent while keeping the relative order of the rest.
    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub(crate) fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub(crate) fn push_child(&mut self, node_id: NodeId) {
        self.owned.push(Owned::Child(node_id));
    }

    pub(crate) fn remove_child(&mut self, node_id: NodeId) {
        let position = self
            .owned
            .iter()
            .rposition(|owned| matches!(owned, Owned::Child(id) if *id == node_id));
        if let Some(position) = position {
            self.owned.remove(position);
        }
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children().count()
    }

    fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.owned.iter().filter_map(|owned| match owned {
            Owned::Child(id) => Some(*id),
            Owned::Cleanup(_) => None,
        })
    }

    pub(crate) fn push_cleanup(&mut self, cleanup: Cleanup) {
        self.owned.push(Owned::Cleanup(cleanup));
    }

    /// Take every child and cleanup, in registration order.
    pub(crate) fn take_owned(&mut self) -> Vec<Owned> {
        std::mem::take(&mut self.owned)
    }

    pub(crate) fn push_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handlers.push(handler);
    }

    /// The most recently registered error handler, if any.
    pub(crate) fn error_handler(&self) -> Option<ErrorHandler> {
        self.error_handlers.last().cloned()
    }

    pub(crate) fn computation(&self) -> Option<Rc<dyn Computation>> {
        self.computation.clone()
    }

    pub(crate) fn is_disposing(&self) -> bool {
        self.disposing
    }

    pub(crate) fn set_disposing(&mut self) {
        self.disposing = true;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("dirty", &self.dirty)
            .field("seq", &self.seq)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("owner", &self.owner)
            .field("children", &self.children().collect::<Vec<_>>())
            .field("cleanups", &(self.owned.len() - self.child_count()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_node_starts_clean() {
        let node = Node::new(NodeKind::Cell, 0, None, None);
        assert_eq!(node.kind(), NodeKind::Cell);
        assert!(node.is_clean());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = Node::new(NodeKind::Derived, 0, None, None);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn dependency_management() {
        let mut node = Node::new(NodeKind::Derived, 0, None, None);
        let dep1 = NodeId::new(1, 0);
        let dep2 = NodeId::new(2, 0);

        node.add_dependency(dep1);
        node.add_dependency(dep2);
        node.add_dependency(dep1);

        assert_eq!(node.dependencies(), &[dep1, dep2]);

        node.remove_dependency(dep1);
        assert_eq!(node.dependencies(), &[dep2]);
    }

    #[test]
    fn owned_entries_keep_registration_order() {
        let mut node = Node::new(NodeKind::Owner, 0, None, None);
        let (first, second) = (NodeId::new(1, 0), NodeId::new(2, 0));
        node.push_child(first);
        node.push_cleanup(Box::new(|| {}));
        node.push_child(second);
        assert_eq!(node.child_count(), 2);

        node.remove_child(first);
        let owned = node.take_owned();
        assert!(matches!(owned.as_slice(), [Owned::Cleanup(_), Owned::Child(id)] if *id == second));
        assert_eq!(node.child_count(), 0);
    }

    #[test]
    fn removing_a_dependent_keeps_order() {
        let mut node = Node::new(NodeKind::Cell, 0, None, None);
        let ids: Vec<_> = (0..4).map(|i| NodeId::new(i, 0)).collect();
        for id in &ids {
            node.add_dependent(*id);
        }

        node.remove_dependent(ids[1]);
        let remaining: Vec<_> = node.dependents().iter().copied().collect();
        assert_eq!(remaining, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = Node::new(NodeKind::Derived, 0, None, None);

        node.mark_clean();
        assert_eq!(node.dirty_state(), DirtyState::Clean);

        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // Maybe-dirty never downgrades dirty
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn node_ids_display_slot_and_generation() {
        assert_eq!(NodeId::new(7, 2).to_string(), "#7v2");
    }
}
