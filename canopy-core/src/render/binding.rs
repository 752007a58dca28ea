//! Static or reactive values in a view.

use std::fmt;

use super::vnode::AttrValue;
use crate::error::Result;
use crate::graph::NodeId;
use crate::reactive::{untracked, Cell, Derived};

/// A value that is either fixed or follows a reactive source.
///
/// Reactive bindings are read inside their own observer, so a change
/// updates exactly one host attribute or text node.
pub enum Binding<T: 'static> {
    Static(T),
    Cell(Cell<T>),
    Derived(Derived<T>),
}

impl<T: Clone + 'static> Binding<T> {
    /// Read the value, tracking reactive sources.
    pub fn get(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Cell(cell) => cell.get(),
            Self::Derived(derived) => derived.get(),
        }
    }

    pub fn try_get(&self) -> Result<T> {
        match self {
            Self::Static(value) => Ok(value.clone()),
            Self::Cell(cell) => Ok(cell.get()),
            Self::Derived(derived) => derived.try_get(),
        }
    }

    pub fn try_get_untracked(&self) -> Result<T> {
        untracked(|| self.try_get())
    }

    pub fn is_reactive(&self) -> bool {
        !matches!(self, Self::Static(_))
    }

    pub(crate) fn source(&self) -> Option<NodeId> {
        match self {
            Self::Static(_) => None,
            Self::Cell(cell) => Some(cell.id()),
            Self::Derived(derived) => Some(derived.id()),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Binding<T> {
    /// Whether patching from `self` to `other` needs no work: equal static
    /// values, or the same reactive source.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Static(a), Self::Static(b)) => a == b,
            (a, b) => a.source().is_some() && a.source() == b.source(),
        }
    }
}

impl<T: 'static> Clone for Binding<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Cell(cell) => Self::Cell(cell.clone()),
            Self::Derived(derived) => Self::Derived(derived.clone()),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Cell(cell) => f.debug_tuple("Cell").field(&cell.id()).finish(),
            Self::Derived(derived) => f.debug_tuple("Derived").field(&derived.id()).finish(),
        }
    }
}

impl<T: 'static> From<Cell<T>> for Binding<T> {
    fn from(cell: Cell<T>) -> Self {
        Self::Cell(cell)
    }
}

impl<T: 'static> From<Derived<T>> for Binding<T> {
    fn from(derived: Derived<T>) -> Self {
        Self::Derived(derived)
    }
}

impl<T: 'static> From<Vec<T>> for Binding<Vec<T>> {
    fn from(items: Vec<T>) -> Self {
        Self::Static(items)
    }
}

impl From<&str> for Binding<String> {
    fn from(value: &str) -> Self {
        Self::Static(value.to_owned())
    }
}

impl From<String> for Binding<String> {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

impl From<AttrValue> for Binding<AttrValue> {
    fn from(value: AttrValue) -> Self {
        Self::Static(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;

    #[test]
    fn same_as_compares_values_or_sources() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new("a".to_string());
            let other = Cell::new("a".to_string());

            let text = |s: &str| Binding::<String>::from(s);
            assert!(text("x").same_as(&text("x")));
            assert!(!text("x").same_as(&text("y")));
            assert!(Binding::from(cell.clone()).same_as(&Binding::from(cell.clone())));
            assert!(!Binding::from(cell.clone()).same_as(&Binding::from(other)));
            assert!(!Binding::from(cell).same_as(&text("a")));
        });
    }

    #[test]
    fn derived_bindings_read_through() {
        let runtime = Runtime::new();
        runtime.enter(|| {
            let cell = Cell::new(2);
            let source = cell.clone();
            let binding = Binding::from(Derived::new(move || source.get() * 3));
            assert!(binding.is_reactive());
            assert_eq!(binding.try_get().unwrap(), 6);
            cell.set(3);
            assert_eq!(binding.get(), 9);
        });
    }
}
