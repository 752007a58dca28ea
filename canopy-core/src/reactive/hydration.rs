//! Cell capture and seeding.
//!
//! A server renders a tree while capturing the cells created along the
//! way, serializes their values, and ships them with the markup. The
//! client replays the same construction while seeding those values, so
//! every cell starts out with the state the server rendered.
//!
//! Both sides rely on cells being created in the same order. Capture
//! records cells in creation order; seeding hands out seeds in that order.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use super::cell::CellInner;
use super::runtime::{Runtime, RuntimeInner};
use crate::graph::NodeId;

/// A cell recorded by [`Runtime::capture`].
#[derive(Clone)]
pub struct CapturedCell {
    id: NodeId,
    handle: Rc<dyn Any>,
}

impl CapturedCell {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the captured cell holds a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.handle.is::<CellInner<T>>()
    }

    /// The cell's current value, if it holds a `T`. Does not track.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.handle
            .downcast_ref::<CellInner<T>>()
            .map(|cell| cell.value().borrow().clone())
    }
}

impl fmt::Debug for CapturedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedCell").field("id", &self.id).finish()
    }
}

/// Cells created during one [`Runtime::capture`] call, in creation order.
#[derive(Debug, Clone, Default)]
pub struct CellCapture {
    cells: Vec<CapturedCell>,
}

impl CellCapture {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CapturedCell> {
        self.cells.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedCell> {
        self.cells.iter()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.cells.iter().map(CapturedCell::id).collect()
    }

    /// Values of every captured cell holding a `T`, with their position.
    pub fn values<T: Clone + 'static>(&self) -> Vec<(usize, T)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| cell.get::<T>().map(|value| (index, value)))
            .collect()
    }
}

/// An initial value for the next cell created under [`Runtime::seed`].
pub struct Seed(Option<Box<dyn Any>>);

impl Seed {
    pub fn new<T: 'static>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    /// Leave the next cell with the value its constructor passes.
    pub fn skip() -> Self {
        Self(None)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Seed(..)"),
            None => f.write_str("Seed::skip"),
        }
    }
}

impl Runtime {
    /// Run `f` and return every cell it created.
    ///
    /// Captures nest: a cell created inside an inner capture also appears
    /// in every enclosing one.
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> (R, CellCapture) {
        self.inner.captures.borrow_mut().push(Vec::new());
        let scope = CaptureScope {
            runtime: &self.inner,
            active: true,
        };
        let value = self.enter(f);
        let cells = scope.finish();
        (value, CellCapture { cells })
    }

    /// Run `f`, replacing the initial values of the cells it creates.
    ///
    /// The n-th cell created consumes the n-th seed. A seed whose type
    /// does not match the cell is discarded with a warning. Cells created
    /// after the seeds run out keep their own initial values.
    pub fn seed<R>(&self, seeds: impl IntoIterator<Item = Seed>, f: impl FnOnce() -> R) -> R {
        struct Pop<'a>(&'a RuntimeInner);
        impl Drop for Pop<'_> {
            fn drop(&mut self) {
                let leftover = self.0.seeds.borrow_mut().pop();
                if let Some(leftover) = leftover.filter(|queue| !queue.is_empty()) {
                    warn!(unused = leftover.len(), "seeds left over after hydration");
                }
            }
        }

        self.inner.seeds.borrow_mut().push(seeds.into_iter().collect());
        let _pop = Pop(&self.inner);
        self.enter(f)
    }
}

impl RuntimeInner {
    pub(crate) fn take_seed<T: 'static>(&self) -> Option<T> {
        let seed = self.seeds.borrow_mut().last_mut()?.pop_front()?;
        let value = seed.0?;
        match value.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(_) => {
                warn!(expected = std::any::type_name::<T>(), "seed type mismatch; keeping the initial value");
                None
            }
        }
    }

    pub(crate) fn record_cell(&self, id: NodeId, handle: Rc<dyn Any>) {
        let mut captures = self.captures.borrow_mut();
        for capture in captures.iter_mut() {
            capture.push(CapturedCell {
                id,
                handle: handle.clone(),
            });
        }
    }
}

/// Pops the capture frame, even when the captured closure unwinds.
struct CaptureScope<'a> {
    runtime: &'a RuntimeInner,
    active: bool,
}

impl CaptureScope<'_> {
    fn finish(mut self) -> Vec<CapturedCell> {
        self.active = false;
        self.runtime.captures.borrow_mut().pop().unwrap_or_default()
    }
}

impl Drop for CaptureScope<'_> {
    fn drop(&mut self) {
        if self.active {
            self.runtime.captures.borrow_mut().pop();
        }
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Cell;

    #[test]
    fn capture_records_cells_in_creation_order() {
        let runtime = Runtime::new();
        let ((a, b), capture) = runtime.capture(|| (Cell::new(1), Cell::new("two".to_string())));

        assert_eq!(capture.len(), 2);
        assert_eq!(capture.ids(), vec![a.id(), b.id()]);
        assert_eq!(capture.get(0).and_then(|c| c.get::<i32>()), Some(1));
        assert_eq!(capture.get(1).and_then(|c| c.get::<String>()), Some("two".to_string()));
        assert!(capture.get(1).is_some_and(|c| !c.is::<i32>()));
    }

    #[test]
    fn captured_values_follow_later_writes() {
        let runtime = Runtime::new();
        let (cell, capture) = runtime.capture(|| Cell::new(1));
        runtime.enter(|| cell.set(5));
        assert_eq!(capture.values::<i32>(), vec![(0, 5)]);
    }

    #[test]
    fn nested_captures_both_record() {
        let runtime = Runtime::new();
        let ((_, inner), outer) = runtime.capture(|| runtime.capture(|| Cell::new(0u8)));
        assert_eq!(inner.len(), 1);
        assert_eq!(outer.len(), 1);
    }

    #[test]
    fn seeds_replace_initial_values_in_order() {
        let runtime = Runtime::new();
        let (a, b, c) = runtime.seed([Seed::new(10), Seed::skip()], || {
            (Cell::new(1), Cell::new(2), Cell::new(3))
        });
        runtime.enter(|| {
            assert_eq!(a.get(), 10);
            assert_eq!(b.get(), 2);
            assert_eq!(c.get(), 3);
        });
    }

    #[test]
    fn mismatched_seeds_are_ignored() {
        let runtime = Runtime::new();
        let cell = runtime.seed([Seed::new("text")], || Cell::new(7));
        assert_eq!(cell.get_untracked(), 7);
    }

    #[test]
    fn capture_then_seed_round_trips_through_json() {
        let server = Runtime::new();
        let (_, capture) = server.capture(|| {
            let count = Cell::new(0);
            count.set(41);
            count.update(|n| n + 1);
        });
        let payload = serde_json::to_string(&capture.values::<i32>()).unwrap();

        let shipped: Vec<(usize, i32)> = serde_json::from_str(&payload).unwrap();
        let client = Runtime::new();
        let count = client.seed(shipped.into_iter().map(|(_, v)| Seed::new(v)), || Cell::new(0));
        assert_eq!(count.get_untracked(), 42);
    }
}
