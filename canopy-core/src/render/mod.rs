//! Rendering
//!
//! Views are described with [`VNode`] trees and mounted through a
//! [`Reconciler`] onto any renderer implementing [`HostAdapter`].
//!
//! Rendering is fine-grained. A component re-renders only when something
//! its render function read changes, and a reactive attribute or text
//! binding updates its single host node without re-rendering anything.
//! Keyed children keep their host nodes across reorders; see [`keyed`]
//! for how moves are planned.

mod binding;
mod host;
mod instance;
pub mod keyed;
mod list;
mod reconciler;
mod vnode;

pub use binding::Binding;
pub use host::HostAdapter;
pub use instance::Phase;
pub use list::{for_each, ListNode};
pub use reconciler::{MountHandle, Reconciler};
pub use vnode::{
    component, element, try_component, AttrPatch, AttrValue, Attributes, Component, Element,
    EventHandler, Key, RenderFn, VNode,
};
