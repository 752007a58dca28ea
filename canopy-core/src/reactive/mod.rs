//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, derived values,
//! observers and owners. These primitives form the foundation of canopy's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell's value is read
//! within a tracking context (such as a derived value or observer), the
//! read registers that context as a dependent. When the cell's value
//! changes, all dependents are invalidated.
//!
//! ## Derived values
//!
//! A Derived value caches the result of a computation over other reactive
//! values. It is lazy: it re-evaluates on read, and only when one of its
//! dependencies actually changed.
//!
//! ## Observers
//!
//! An Observer is a side-effecting computation that runs whenever its
//! dependencies change. Observers synchronize reactive state with external
//! systems, such as a host's node tree.
//!
//! ## Owners
//!
//! An Owner is a disposal scope. Everything created under it is torn down
//! with it, last registered first.
//!
//! # Implementation Notes
//!
//! Each runtime keeps a stack of evaluation frames to detect dependencies
//! automatically: when a value is read, the innermost running computation
//! records it. Dependencies are rebuilt from scratch on every run, so
//! conditional reads subscribe and unsubscribe as branches change.

mod cell;
mod config;
mod context;
mod derived;
mod hydration;
mod observer;
mod owner;
mod runtime;

pub use cell::Cell;
pub use config::{FlushMode, RuntimeConfig, DEFAULT_MAX_FLUSH_PASSES};
pub use derived::Derived;
pub use hydration::{CapturedCell, CellCapture, Seed};
pub use observer::Observer;
pub use owner::{on_cleanup, on_error, Owner};
pub use runtime::{batch, try_batch, untracked, Runtime};
