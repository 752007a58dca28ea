//! Derived Implementation
//!
//! A Derived is a cached value computed from other reactive values. It
//! re-evaluates only when one of its dependencies changes.
//!
//! # How Derived Values Work
//!
//! 1. Creation computes nothing. On first read the computation runs and
//!    the result is cached.
//!
//! 2. When read again, if no dependencies have changed, returns the cache.
//!
//! 3. When a dependency changes, the derived value is marked "maybe dirty"
//!    (or "dirty" if the change was direct).
//!
//! 4. On next read, derived inputs are brought up to date first. Only if
//!    one of them actually produced a different value does it recompute.
//!
//! 5. If the recomputed value equals the cached one, dependents are not
//!    invalidated.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A cell changes
//! - 10 derived values depend on it
//! - Only the ones actually read will recompute
//! - Derived values that are never read stay dirty (no wasted work)

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{raise, Runtime, RuntimeInner};
use crate::error::{Error, Result};
use crate::graph::{Computation, DirtyState, NodeId, NodeKind};

type ComputeFn<T> = Rc<dyn Fn() -> T>;
type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

struct DerivedInner<T> {
    compute: RefCell<Option<ComputeFn<T>>>,
    value: RefCell<Option<T>>,
    equals: EqualsFn<T>,
}

impl<T: 'static> Computation for DerivedInner<T> {
    fn evaluate(&self) -> Result<bool> {
        let compute = self.compute.borrow().clone();
        let Some(compute) = compute else {
            return Ok(false);
        };
        let next = compute();

        let changed = match &*self.value.borrow() {
            Some(previous) => !(self.equals)(previous, &next),
            None => true,
        };
        if changed {
            *self.value.borrow_mut() = Some(next);
        }
        Ok(changed)
    }

    fn release(&self) {
        let compute = self.compute.borrow_mut().take();
        drop(compute);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// A derived value also acts as an owner: observers or owners created
/// inside its computation are disposed before each recomputation.
///
/// # Example
///
/// ```rust
/// use canopy_core::{Cell, Derived};
///
/// let count = Cell::new(2);
/// let doubled = {
///     let count = count.clone();
///     Derived::new(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T: 'static> {
    id: NodeId,
    runtime: Weak<RuntimeInner>,
    inner: Rc<DerivedInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Derived<T> {
    /// Create a new derived value. Results are compared with `PartialEq`.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::new_with_equals(compute, |a, b| a == b)
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// Create a derived value with a custom equality function.
    pub fn new_with_equals(
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let runtime = Runtime::current();
        let inner = Rc::new(DerivedInner {
            compute: RefCell::new(Some(Rc::new(compute) as ComputeFn<T>)),
            value: RefCell::new(None),
            equals: Box::new(equals),
        });
        let id = runtime
            .inner
            .register(NodeKind::Derived, Some(inner.clone() as Rc<dyn Computation>));
        Self {
            id,
            runtime: Rc::downgrade(&runtime.inner),
            inner,
        }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    ///
    /// # Panics
    ///
    /// Panics when the value cannot be produced (a dependency cycle, or a
    /// read after disposal before any value existed). Inside another
    /// computation the failure is reported to that computation's caller
    /// as an [`Error`] rather than aborting the program.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => raise(err),
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn try_get(&self) -> Result<T> {
        let Some(runtime) = self.runtime.upgrade().filter(|rt| rt.contains(self.id)) else {
            // Disposed: the last value stays readable
            return self.cached().ok_or(Error::Disposed { id: self.id });
        };

        runtime.track(self.id);
        runtime.update_if_necessary(self.id)?;
        // Writes made while recomputing were held back; run them now
        // unless this read is itself part of a computation.
        runtime.maybe_flush()?;
        self.cached().ok_or(Error::Disposed { id: self.id })
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.untracked(|| self.get()),
            None => self.get(),
        }
    }

    /// Dirty state of the cached value. Disposed values report `Clean`.
    pub fn state(&self) -> DirtyState {
        self.runtime
            .upgrade()
            .and_then(|runtime| runtime.dirty_state(self.id))
            .unwrap_or(DirtyState::Clean)
    }

    /// Whether a value has been computed.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of computations that read this value during their last run.
    pub fn subscriber_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.subscriber_count(self.id))
    }

    /// Stop tracking dependencies. The last computed value stays readable.
    pub fn dispose(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.runtime
            .upgrade()
            .map_or(true, |runtime| !runtime.contains(self.id))
    }

    fn cached(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }
}

impl<T: 'static> Derived<T> {
    /// Get the derived value's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T: 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            runtime: self.runtime.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

// ---- Tests ----
