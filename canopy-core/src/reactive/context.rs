//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell or derived value
//! is read, the read is recorded against the innermost running computation.
//!
//! # Implementation
//!
//! Each runtime keeps a stack of evaluation frames. Running a derived value
//! or an observer pushes a frame; `untracked` pushes a frame that records
//! nothing. Frames are popped by guards, so the stack stays balanced even
//! when a computation unwinds.
//!
//! A second stack holds the nodes currently being brought up to date.
//! Reaching a node that is already on it means the graph has a cycle.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::graph::NodeId;

pub(crate) type Dependencies = SmallVec<[NodeId; 8]>;

/// An entry in the evaluation stack.
#[derive(Debug)]
struct Frame {
    /// The computation being evaluated, or `None` for an untracked region.
    node: Option<NodeId>,
    /// Dependencies collected during this evaluation, in first-read order.
    dependencies: Dependencies,
}

#[derive(Debug, Default)]
pub(crate) struct Tracker {
    frames: RefCell<Vec<Frame>>,
    visiting: RefCell<Vec<NodeId>>,
}

impl Tracker {
    /// Enter a new evaluation frame.
    ///
    /// While the frame is on top, every read registers as a dependency of
    /// `node`. The frame is popped when the returned guard is dropped.
    pub(crate) fn enter(&self, node: Option<NodeId>) -> FrameGuard<'_> {
        self.frames.borrow_mut().push(Frame {
            node,
            dependencies: SmallVec::new(),
        });
        FrameGuard {
            tracker: self,
            node,
            active: true,
        }
    }

    /// Record a read of `dependency` in the innermost frame.
    pub(crate) fn track(&self, dependency: NodeId) {
        let mut frames = self.frames.borrow_mut();
        if let Some(frame) = frames.last_mut() {
            if frame.node.is_some() && !frame.dependencies.contains(&dependency) {
                frame.dependencies.push(dependency);
            }
        }
    }

    /// The computation that reads are currently attributed to.
    #[cfg(test)]
    pub(crate) fn current(&self) -> Option<NodeId> {
        self.frames.borrow().last().and_then(|frame| frame.node)
    }

    /// Whether any computation is running, tracked or not.
    pub(crate) fn is_evaluating(&self) -> bool {
        self.frames.borrow().iter().any(|frame| frame.node.is_some())
    }

    /// Push `node` on the visiting stack, failing if it is already there.
    pub(crate) fn visit(&self, node: NodeId) -> Result<VisitGuard<'_>> {
        let mut visiting = self.visiting.borrow_mut();
        if let Some(position) = visiting.iter().position(|id| *id == node) {
            let mut chain = visiting[position..].to_vec();
            chain.push(node);
            return Err(Error::Cycle { chain });
        }
        visiting.push(node);
        Ok(VisitGuard { tracker: self })
    }

    fn pop(&self, node: Option<NodeId>) -> Dependencies {
        let popped = self.frames.borrow_mut().pop();
        match popped {
            Some(frame) => {
                // Verify we're popping the right frame.
                debug_assert_eq!(frame.node, node, "evaluation frame mismatch");
                frame.dependencies
            }
            None => SmallVec::new(),
        }
    }
}

/// Guard that pops the evaluation frame when dropped.
pub(crate) struct FrameGuard<'a> {
    tracker: &'a Tracker,
    node: Option<NodeId>,
    active: bool,
}

impl FrameGuard<'_> {
    /// Pop the frame and return the dependencies it collected.
    pub(crate) fn finish(mut self) -> Dependencies {
        self.active = false;
        self.tracker.pop(self.node)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.tracker.pop(self.node);
        }
    }
}

pub(crate) struct VisitGuard<'a> {
    tracker: &'a Tracker,
}

impl Drop for VisitGuard<'_> {
    fn drop(&mut self) {
        self.tracker.visiting.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_tracks_reads() {
        let tracker = Tracker::default();
        let node = NodeId::new(0, 0);

        assert!(tracker.current().is_none());
        {
            let frame = tracker.enter(Some(node));
            assert_eq!(tracker.current(), Some(node));

            tracker.track(NodeId::new(1, 0));
            tracker.track(NodeId::new(2, 0));
            tracker.track(NodeId::new(1, 0));

            let deps = frame.finish();
            assert_eq!(deps.as_slice(), &[NodeId::new(1, 0), NodeId::new(2, 0)]);
        }

        // Context should be cleaned up after finish
        assert!(tracker.current().is_none());
        assert!(!tracker.is_evaluating());
    }

    #[test]
    fn untracked_frames_record_nothing() {
        let tracker = Tracker::default();
        let outer = NodeId::new(0, 0);

        let frame = tracker.enter(Some(outer));
        {
            let _untracked = tracker.enter(None);
            assert!(tracker.current().is_none());
            assert!(tracker.is_evaluating());
            tracker.track(NodeId::new(5, 0));
        }
        tracker.track(NodeId::new(6, 0));

        assert_eq!(frame.finish().as_slice(), &[NodeId::new(6, 0)]);
    }

    #[test]
    fn nested_frames() {
        let tracker = Tracker::default();
        let id1 = NodeId::new(1, 0);
        let id2 = NodeId::new(2, 0);

        {
            let _ctx1 = tracker.enter(Some(id1));
            assert_eq!(tracker.current(), Some(id1));

            {
                let _ctx2 = tracker.enter(Some(id2));
                assert_eq!(tracker.current(), Some(id2));
            }

            // After inner frame drops, outer should be current
            assert_eq!(tracker.current(), Some(id1));
        }

        assert!(tracker.current().is_none());
    }

    #[test]
    fn revisiting_reports_the_cycle() {
        let tracker = Tracker::default();
        let a = NodeId::new(1, 0);
        let b = NodeId::new(2, 0);

        let _a = tracker.visit(a).unwrap();
        let _b = tracker.visit(b).unwrap();
        let revisit = tracker.visit(a).map(|_| ());
        match revisit {
            Err(Error::Cycle { chain }) => assert_eq!(chain, vec![a, b, a]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }
}
