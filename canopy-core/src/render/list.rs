//! Keyed lists.
//!
//! [`for_each`] renders one row per item. Each row gets its own
//! [`Cell`] holding the item; when the list changes, rows whose key
//! survives are reused and their cell is updated in place, so only the
//! bindings that read the changed fields re-run.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::binding::Binding;
use super::vnode::{Key, VNode};
use crate::error::{Error, Result};
use crate::reactive::Cell;

/// A keyed list in a view. Build one with [`for_each`].
#[derive(Clone)]
pub struct ListNode {
    pub(crate) driver: Rc<dyn ListDriver>,
}

/// Type-erased access to a list's items and rows.
pub(crate) trait ListDriver {
    /// Read the items (tracked), push new values into surviving rows and
    /// return the keys in order.
    fn refresh(&self) -> Result<Vec<Key>>;

    /// Render the row for a key returned by the last `refresh` that has
    /// no row yet.
    fn render(&self, key: &Key) -> Result<VNode>;

    /// Drop the row state of a removed key.
    fn forget(&self, key: &Key);

    /// Whether `other` lists the same item type, so its rows can be taken over.
    fn is_compatible(&self, other: &dyn ListDriver) -> bool;

    /// Take over the rows of a compatible list.
    fn adopt(&self, previous: &dyn ListDriver);

    fn as_any(&self) -> &dyn Any;
}

/// Render a keyed list.
///
/// `items` is read reactively; `key` must give every item a key unique
/// within the list. `render` runs once per new key and receives a cell
/// that follows the item with that key.
///
/// # Example
///
/// ```rust
/// use canopy_core::render::{element, for_each, VNode};
/// use canopy_core::Cell;
///
/// let todos = Cell::new(vec![(1, "write"), (2, "ship")]);
/// let view: VNode = element("ul")
///     .child(for_each(
///         todos.clone(),
///         |todo: &(i32, &'static str)| todo.0,
///         |todo: Cell<(i32, &'static str)>| element("li").child(todo.get_untracked().1).into(),
///     ))
///     .into();
/// # drop(view);
/// ```
pub fn for_each<T, K>(
    items: impl Into<Binding<Vec<T>>>,
    key: impl Fn(&T) -> K + 'static,
    render: impl Fn(Cell<T>) -> VNode + 'static,
) -> ListNode
where
    T: Clone + PartialEq + 'static,
    K: Into<Key>,
{
    ListNode {
        driver: Rc::new(TypedList {
            items: items.into(),
            key: Box::new(move |item| key(item).into()),
            render: Box::new(render),
            rows: RefCell::new(HashMap::new()),
            fresh: RefCell::new(HashMap::new()),
        }),
    }
}

struct TypedList<T: 'static> {
    items: Binding<Vec<T>>,
    key: Box<dyn Fn(&T) -> Key>,
    render: Box<dyn Fn(Cell<T>) -> VNode>,
    rows: RefCell<HashMap<Key, Cell<T>>>,
    /// Items of keys that have no row yet.
    fresh: RefCell<HashMap<Key, T>>,
}

impl<T: Clone + PartialEq + 'static> ListDriver for TypedList<T> {
    fn refresh(&self) -> Result<Vec<Key>> {
        let items = self.items.try_get()?;
        let mut keys = Vec::with_capacity(items.len());
        let mut seen = HashSet::with_capacity(items.len());
        let mut updates = Vec::new();
        let mut fresh = HashMap::new();

        for item in items {
            let key = (self.key)(&item);
            if !seen.insert(key.clone()) {
                tracing::warn!(%key, "duplicate key in list");
                return Err(Error::DuplicateKey {
                    key: key.to_string(),
                });
            }
            match self.rows.borrow().get(&key) {
                Some(row) => updates.push((row.clone(), item)),
                None => {
                    fresh.insert(key.clone(), item);
                }
            }
            keys.push(key);
        }

        *self.fresh.borrow_mut() = fresh;
        for (row, item) in updates {
            row.try_set(item)?;
        }
        Ok(keys)
    }

    fn render(&self, key: &Key) -> Result<VNode> {
        let item = self.fresh.borrow_mut().remove(key).ok_or_else(|| {
            Error::evaluation(format!("list has no pending item for key {key}"))
        })?;
        let row = Cell::new(item);
        self.rows.borrow_mut().insert(key.clone(), row.clone());
        Ok((self.render)(row))
    }

    fn forget(&self, key: &Key) {
        self.rows.borrow_mut().remove(key);
    }

    fn is_compatible(&self, other: &dyn ListDriver) -> bool {
        other.as_any().is::<Self>()
    }

    fn adopt(&self, previous: &dyn ListDriver) {
        if let Some(previous) = previous.as_any().downcast_ref::<Self>() {
            let rows = std::mem::take(&mut *previous.rows.borrow_mut());
            *self.rows.borrow_mut() = rows;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---- Tests ----
