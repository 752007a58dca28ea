//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a reactive context (derived/observer), the
//!    read is recorded and the computation becomes a dependent.
//!
//! 2. When a cell's value changes, every dependent is invalidated and the
//!    observers among them are queued.
//!
//! 3. Writing a value equal to the current one (per the cell's equality
//!    function) is a no-op: nothing is invalidated.
//!
//! # Memory Layout
//!
//! Each cell consists of:
//! - A node id (8 bytes) in its runtime's arena
//! - The value, shared by every clone of the handle
//! - An equality function
//!
//! The arena node lives as long as at least one handle does.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, RuntimeInner};
use crate::error::Result;
use crate::graph::NodeId;

pub(crate) struct CellInner<T> {
    id: NodeId,
    runtime: Weak<RuntimeInner>,
    value: RefCell<T>,
    equals: Box<dyn Fn(&T, &T) -> bool>,
}

impl<T> CellInner<T> {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn value(&self) -> &RefCell<T> {
        &self.value
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.release_cell(self.id);
        }
    }
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use canopy_core::Cell;
///
/// let count = Cell::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies dependents)
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// Create a new cell with the given initial value.
    ///
    /// Writes are compared with `PartialEq`; equal writes are ignored.
    pub fn new(value: T) -> Self {
        Self::new_with_equals(value, |a, b| a == b)
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// Create a cell with a custom equality function.
    ///
    /// `|_, _| false` makes every write notify dependents.
    pub fn new_with_equals(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        let runtime = Runtime::current();
        let value = runtime.inner.take_seed::<T>().unwrap_or(value);
        let id = runtime.inner.register_cell();
        let inner = Rc::new(CellInner {
            id,
            runtime: Rc::downgrade(&runtime.inner),
            value: RefCell::new(value),
            equals: Box::new(equals),
        });
        runtime.inner.record_cell(id, inner.clone());
        Self { inner }
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// The cell must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Set a new value and notify dependents.
    ///
    /// Outside any batch or computation, queued observers run before this
    /// returns. Errors from those observers that no boundary handles are
    /// returned here.
    pub fn try_set(&self, value: T) -> Result<()> {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            if (self.inner.equals)(&current, &value) {
                false
            } else {
                *current = value;
                true
            }
        };
        if !changed {
            return Ok(());
        }
        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.notify_changed(self.inner.id),
            None => Ok(()),
        }
    }

    /// Set a new value and notify dependents.
    ///
    /// # Panics
    ///
    /// Panics if an observer triggered by this write fails and no error
    /// boundary handles the failure. Use [`Cell::try_set`] to receive the
    /// error instead.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("unhandled error after writing cell {}: {err}", self.inner.id);
        }
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }

    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&self.inner.value.borrow());
        self.try_set(next)
    }

    /// Number of computations that read this cell during their last run.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.subscriber_count(self.inner.id))
    }

    fn track(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id);
        }
    }
}

impl<T: 'static> Cell<T> {
    /// Get the cell's node id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl<T: Default + Clone + PartialEq + 'static> Default for Cell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observer;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn cell_get_set() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new(42);
            assert_eq!(cell.get(), 42);

            cell.set(100);
            assert_eq!(cell.get(), 100);
        });
    }

    #[test]
    fn cell_update() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new(10);
            cell.update(|x| x + 5);
            assert_eq!(cell.get(), 15);
        });
    }

    #[test]
    fn cell_with_borrows_without_cloning() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new(vec![1, 2, 3]);
            assert_eq!(cell.with(|items| items.len()), 3);
        });
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new(1);
            let runs = Arc::new(AtomicI32::new(0));
            let runs_clone = runs.clone();
            let reader = cell.clone();
            let _observer = Observer::new(move || {
                reader.get();
                runs_clone.fetch_add(1, Ordering::SeqCst);
            });

            cell.set(1);
            assert_eq!(runs.load(Ordering::SeqCst), 1);

            cell.set(2);
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn custom_equality_can_force_notification() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new_with_equals(1, |_, _| false);
            let runs = Arc::new(AtomicI32::new(0));
            let runs_clone = runs.clone();
            let reader = cell.clone();
            let _observer = Observer::new(move || {
                reader.get();
                runs_clone.fetch_add(1, Ordering::SeqCst);
            });

            cell.set(1);
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn untracked_reads_do_not_subscribe() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new(1);
            let reader = cell.clone();
            let _observer = Observer::new(move || {
                reader.get_untracked();
            });
            assert_eq!(cell.subscriber_count(), 0);
        });
    }

    #[test]
    fn dropping_every_handle_frees_the_node() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let before = runtime.node_count();
            let cell = Cell::new(1);
            let clone = cell.clone();
            assert_eq!(runtime.node_count(), before + 1);

            drop(cell);
            assert_eq!(runtime.node_count(), before + 1);
            drop(clone);
            assert_eq!(runtime.node_count(), before);
        });
    }
}
