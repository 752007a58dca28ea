//! The host adapter contract.
//!
//! The reconciler never touches real nodes. Everything it does to the
//! outside world goes through a [`HostAdapter`]: a DOM binding, a canvas
//! scene graph, a terminal UI or an in-memory tree in tests.

use std::fmt;

use super::vnode::{AttrPatch, Attributes, EventHandler};
use crate::error::HostError;

/// Operations the reconciler needs from a renderer.
///
/// Inserting a node that already has a parent moves it, as in the DOM.
/// The reconciler relies on this for keyed reorders.
///
/// Failures are not retried; they surface as
/// [`Error::Host`](crate::Error::Host) to whoever triggered the render.
pub trait HostAdapter: 'static {
    /// A handle to a host node. Cheap to clone; equal handles refer to
    /// the same node.
    type Node: Clone + PartialEq + fmt::Debug + 'static;

    fn create_node(&mut self, kind: &str, attributes: &Attributes) -> Result<Self::Node, HostError>;

    /// Apply attribute changes. A `None` value removes the attribute.
    fn update_node(&mut self, node: &Self::Node, changes: &AttrPatch) -> Result<(), HostError>;

    fn create_text_node(&mut self, text: &str) -> Result<Self::Node, HostError>;

    fn update_text_node(&mut self, node: &Self::Node, text: &str) -> Result<(), HostError>;

    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node) -> Result<(), HostError>;

    /// Insert `child` into `parent` right before `reference`.
    fn insert_before(
        &mut self,
        parent: &Self::Node,
        child: &Self::Node,
        reference: &Self::Node,
    ) -> Result<(), HostError>;

    fn remove_child(&mut self, parent: &Self::Node, child: &Self::Node) -> Result<(), HostError>;

    fn add_event_listener(
        &mut self,
        node: &Self::Node,
        event: &str,
        handler: &EventHandler,
    ) -> Result<(), HostError>;

    /// Detach a handler previously passed to `add_event_listener`.
    /// Handlers are identified by `Rc::ptr_eq`.
    fn remove_event_listener(
        &mut self,
        node: &Self::Node,
        event: &str,
        handler: &EventHandler,
    ) -> Result<(), HostError>;
}
