//! Canopy Core
//!
//! This crate provides the core of the Canopy reactive UI runtime.
//! It implements:
//!
//! - Reactive primitives (cells, derived values, observers, owners)
//! - Glitch-free, batched change propagation over a dependency graph
//! - Virtual nodes and a keyed reconciler driving a pluggable host
//! - A capture/seed boundary for server rendering and hydration
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Arena of reactive nodes and dirty-state propagation
//! - `reactive`: Runtime, tracking, cells, derived values, observers, owners
//! - `render`: Virtual nodes, host adapter trait, reconciler
//! - `error`: Error types shared by all of the above
//!
//! # Example
//!
//! ```rust
//! use canopy_core::{Cell, Derived, Observer};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! // Create a cell
//! let count = Cell::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Derived::new(move || count.get() * 2)
//! };
//!
//! // Create an observer
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let _observer = {
//!     let (doubled, seen) = (doubled.clone(), seen.clone());
//!     Observer::new(move || seen.borrow_mut().push(doubled.get()))
//! };
//!
//! // Update the cell; the observer runs again
//! count.set(5);
//! assert_eq!(*seen.borrow(), [0, 10]);
//! ```

pub mod error;
pub mod graph;
pub mod reactive;
pub mod render;

pub use error::{BoxError, Error, HostError, Result};
pub use graph::NodeId;
pub use reactive::{
    batch, on_cleanup, on_error, try_batch, untracked, Cell, Derived, FlushMode, Observer, Owner,
    Runtime, RuntimeConfig,
};
pub use render::{component, element, for_each, HostAdapter, Reconciler, VNode};
