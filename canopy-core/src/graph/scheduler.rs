//! Update Scheduler
//!
//! The scheduler owns the node arena and decides which observers must run
//! after a source changes.
//!
//! # Algorithm
//!
//! Propagation is "push invalidation, pull recomputation":
//!
//! 1. When a cell changes, mark its direct dependents as "dirty"
//! 2. Propagate "maybe dirty" to everything reachable downstream
//! 3. Queue every observer that was reached
//! 4. The runtime drains the queue in creation order; for each observer:
//!    - For "maybe dirty" nodes: bring derived inputs up to date first and
//!      stop as soon as one of them reports a changed value
//!    - For "dirty" nodes: recompute
//!    - If a derived output changed, mark its dependents as dirty
//!
//! Nothing recomputes during step 1-3, so a node never observes a mix of
//! old and new inputs.

use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::{Computation, Node, NodeId, NodeKind};

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// The update scheduler manages the dependency graph and coordinates updates.
pub(crate) struct UpdateScheduler {
    /// Arena slots, indexed by `NodeId::index`.
    slots: Vec<Slot>,
    /// Vacant slot indices available for reuse.
    free: Vec<u32>,
    next_seq: u64,
    /// Observers waiting for the next flush.
    pending: IndexSet<NodeId>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next_seq: 0,
            pending: IndexSet::new(),
        }
    }

    /// Add a node to the graph and attach it to `owner`'s children.
    pub(crate) fn add_node(
        &mut self,
        kind: NodeKind,
        owner: Option<NodeId>,
        computation: Option<Rc<dyn Computation>>,
    ) -> NodeId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let node = Node::new(kind, seq, owner, computation);

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new(index, 0)
            }
        };

        if let Some(parent) = owner.and_then(|owner| self.get_node_mut(owner)) {
            parent.push_child(id);
        }
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node, detaches it from its
    /// owner and drops it from the pending queue. The removed node is
    /// returned so the caller can drop it outside any borrow of the graph.
    pub(crate) fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(node_id.index() as usize)?;
        if slot.generation != node_id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(node_id.index());

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies() {
            if let Some(dep) = self.get_node_mut(*dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.get_node_mut(*dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        if let Some(parent) = node.owner().and_then(|owner| self.get_node_mut(owner)) {
            parent.remove_child(node_id);
        }

        self.pending.shift_remove(&node_id);
        Some(node)
    }

    /// Get a reference to a node.
    pub(crate) fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.slots
            .get(node_id.index() as usize)
            .filter(|slot| slot.generation == node_id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    /// Get a mutable reference to a node.
    pub(crate) fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(node_id.index() as usize)
            .filter(|slot| slot.generation == node_id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    pub(crate) fn contains(&self, node_id: NodeId) -> bool {
        self.get_node(node_id).is_some()
    }

    /// Number of live nodes.
    pub(crate) fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// This means when `dependency` changes, `dependent` may need to update.
    pub(crate) fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if !self.contains(dependency) || !self.contains(dependent) {
            return;
        }
        if let Some(dep_node) = self.get_node_mut(dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.get_node_mut(dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Remove a dependency edge.
    pub(crate) fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.get_node_mut(dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.get_node_mut(dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace the dependency set of `dependent` with `dependencies`.
    ///
    /// Only the difference is applied: stale edges are removed, new edges
    /// are appended, and edges present in both sets keep their position in
    /// the source's subscriber order.
    pub(crate) fn replace_dependencies(&mut self, dependent: NodeId, dependencies: &[NodeId]) {
        let previous: SmallVec<[NodeId; 4]> = match self.get_node(dependent) {
            Some(node) => node.dependencies().iter().copied().collect(),
            None => return,
        };

        for stale in previous.iter().filter(|id| !dependencies.contains(id)) {
            self.remove_edge(*stale, dependent);
        }
        for fresh in dependencies.iter().filter(|id| !previous.contains(id)) {
            self.add_edge(*fresh, dependent);
        }
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Direct dependents become dirty, everything further downstream
    /// becomes maybe dirty, and every observer reached is queued.
    /// Returns the number of observers newly queued.
    pub(crate) fn mark_changed(&mut self, source_id: NodeId) -> usize {
        let before = self.pending.len();
        let direct: SmallVec<[NodeId; 8]> = match self.get_node(source_id) {
            Some(source) => source.dependents().iter().copied().collect(),
            None => return 0,
        };

        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        for node_id in direct {
            if let Some(node) = self.get_node_mut(node_id) {
                node.mark_dirty();
                if node.kind() == NodeKind::Observer {
                    self.pending.insert(node_id);
                }
                if visited.insert(node_id) {
                    stack.push(node_id);
                }
            }
        }

        // DFS to propagate maybe-dirty status
        while let Some(node_id) = stack.pop() {
            let dependents: SmallVec<[NodeId; 8]> = match self.get_node(node_id) {
                Some(node) => node.dependents().iter().copied().collect(),
                None => continue,
            };
            for dependent_id in dependents {
                if !visited.insert(dependent_id) {
                    continue;
                }
                if let Some(node) = self.get_node_mut(dependent_id) {
                    node.mark_maybe_dirty();
                    if node.kind() == NodeKind::Observer {
                        self.pending.insert(dependent_id);
                    }
                    stack.push(dependent_id);
                }
            }
        }

        self.pending.len() - before
    }

    /// Mark the direct dependents of a recomputed derived node as dirty.
    ///
    /// Observers are not queued here: [`mark_changed`](Self::mark_changed)
    /// already queued every observer downstream of the write.
    pub(crate) fn mark_dependents_dirty(&mut self, node_id: NodeId) {
        let dependents: SmallVec<[NodeId; 8]> = match self.get_node(node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return,
        };
        for dependent_id in dependents {
            if let Some(node) = self.get_node_mut(dependent_id) {
                node.mark_dirty();
            }
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain the pending queue, ordered by node creation.
    ///
    /// Owners are always created before the observers they own, so this
    /// runs parents ahead of their children.
    pub(crate) fn take_pending(&mut self) -> Vec<NodeId> {
        let drained: Vec<NodeId> = self.pending.drain(..).collect();
        let mut ready: Vec<(u64, NodeId)> = drained
            .into_iter()
            .filter_map(|id| self.slots_seq(id).map(|seq| (seq, id)))
            .collect();
        ready.sort_unstable_by_key(|(seq, _)| *seq);
        ready.into_iter().map(|(_, id)| id).collect()
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    fn slots_seq(&self, node_id: NodeId) -> Option<u64> {
        self.get_node(node_id).map(Node::seq)
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Tests ----
