//! Ownership scopes.
//!
//! Every observer, derived value and owner is created under the ambient
//! owner and disposed with it. Disposing an owner walks its children and
//! cleanups together in reverse registration order, so a cleanup added
//! after a child runs before that child is disposed. Observers and derived
//! values are owners too: what they create while running is torn down
//! before they run again.

use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, RuntimeInner};
use crate::error::Error;
use crate::graph::{NodeId, NodeKind};

/// A disposal scope.
#[derive(Clone)]
pub struct Owner {
    id: NodeId,
    runtime: Weak<RuntimeInner>,
}

impl Owner {
    /// Create an owner under the ambient owner. Outside any owner the new
    /// owner is a root and must be disposed explicitly.
    pub fn new() -> Self {
        let runtime = Runtime::current();
        let id = runtime.inner.register(NodeKind::Owner, None);
        Self {
            id,
            runtime: Rc::downgrade(&runtime.inner),
        }
    }

    /// Create a root owner, detached from the ambient owner.
    pub fn root() -> Self {
        let runtime = Runtime::current();
        let id = runtime
            .inner
            .with_owner(None, || runtime.inner.register(NodeKind::Owner, None));
        Self {
            id,
            runtime: Rc::downgrade(&runtime.inner),
        }
    }

    /// The ambient owner, if any.
    ///
    /// Inside a running observer or derived value this is that computation.
    pub fn current() -> Option<Self> {
        let runtime = Runtime::current();
        runtime.inner.current_owner().map(|id| Self {
            id,
            runtime: Rc::downgrade(&runtime.inner),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Run `f` with this owner as the ambient owner.
    pub fn run_with<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.runtime.upgrade() {
            Some(runtime) => {
                let runtime = Runtime::from_inner(runtime);
                runtime.enter(|| runtime.inner.with_owner(Some(self.id), f))
            }
            None => f(),
        }
    }

    /// Register a callback to run when this owner is disposed.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.on_cleanup(Some(self.id), Box::new(f)),
            None => f(),
        }
    }

    /// Install an error boundary. Errors raised by computations owned
    /// (directly or transitively) by this owner are passed to `handler`
    /// instead of propagating to the caller.
    pub fn on_error(&self, handler: impl Fn(&Error) + 'static) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.on_error(Some(self.id), Rc::new(handler));
        }
    }

    /// Dispose everything this owner owns, then the owner itself.
    ///
    /// Idempotent. Writes made by cleanups are flushed once disposal
    /// completes; failures from that flush are logged.
    pub fn dispose(&self) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let flushed = runtime.batch(|| runtime.dispose(self.id));
        if let Err(err) = flushed {
            tracing::error!(owner = %self.id, error = %err, "flush after disposal failed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.runtime
            .upgrade()
            .map_or(true, |runtime| !runtime.contains(self.id))
    }

    /// Number of nodes currently owned directly by this owner.
    pub fn child_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.child_count(self.id))
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.runtime.ptr_eq(&other.runtime)
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Register a cleanup on the ambient owner.
///
/// Inside an observer or derived value the cleanup runs before the next
/// run and when the computation is disposed.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let runtime = Runtime::current();
    if runtime.inner.current_owner().is_none() {
        tracing::warn!("on_cleanup called outside any owner; attaching to the root owner");
    }
    runtime.inner.on_cleanup(None, Box::new(f));
}

/// Install an error boundary on the ambient owner.
pub fn on_error(handler: impl Fn(&Error) + 'static) {
    let runtime = Runtime::current();
    runtime.inner.on_error(None, Rc::new(handler));
}

// ---- Tests ----
