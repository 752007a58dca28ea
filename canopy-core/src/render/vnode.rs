//! Virtual nodes.
//!
//! A [`VNode`] describes what a subtree should look like. Component render
//! functions return them; the reconciler turns them into host nodes and,
//! on re-render, into the minimal set of host operations.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::binding::Binding;
use super::list::ListNode;
use crate::error::{BoxError, Error};

/// An attribute value as handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Identity of a child among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or_else(|_| Self::Str(value.to_string()), Self::Int)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Initial or current attribute values of a host node.
pub type Attributes = IndexMap<String, AttrValue>;

/// Attribute changes for [`HostAdapter::update_node`](super::HostAdapter::update_node).
/// `None` removes the attribute.
pub type AttrPatch = IndexMap<String, Option<AttrValue>>;

/// An event listener. The host passes its event object as `&dyn Any`.
pub type EventHandler = Rc<dyn Fn(&dyn Any)>;

/// A component's render function.
pub type RenderFn = Rc<dyn Fn() -> Result<VNode, BoxError>>;

/// A description of a subtree.
#[derive(Clone)]
pub enum VNode {
    Element(Element),
    Text(Binding<String>),
    Component(Component),
    List(ListNode),
    /// Several siblings without a wrapper node.
    Fragment(Vec<VNode>),
}

impl VNode {
    /// Static text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(Binding::Static(text.into()))
    }

    /// Text that follows a cell or derived value.
    pub fn dynamic_text(text: impl Into<Binding<String>>) -> Self {
        Self::Text(text.into())
    }

    pub fn fragment(children: impl IntoIterator<Item = VNode>) -> Self {
        Self::Fragment(children.into_iter().collect())
    }

    /// The sibling key of elements and components.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Element(element) => element.key.as_ref(),
            Self::Component(component) => component.key.as_ref(),
            Self::Text(_) | Self::List(_) | Self::Fragment(_) => None,
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element(element) => element.fmt(f),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Component(component) => component.fmt(f),
            Self::List(_) => f.write_str("List(..)"),
            Self::Fragment(children) => f.debug_tuple("Fragment").field(children).finish(),
        }
    }
}

impl From<Element> for VNode {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

impl From<Component> for VNode {
    fn from(component: Component) -> Self {
        Self::Component(component)
    }
}

impl From<ListNode> for VNode {
    fn from(list: ListNode) -> Self {
        Self::List(list)
    }
}

impl From<&str> for VNode {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for VNode {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<i64> for VNode {
    fn from(value: i64) -> Self {
        Self::text(value.to_string())
    }
}

impl From<Vec<VNode>> for VNode {
    fn from(children: Vec<VNode>) -> Self {
        Self::Fragment(children)
    }
}

/// A host element with attributes, listeners and children.
///
/// # Example
///
/// ```rust
/// use canopy_core::render::{element, VNode};
///
/// let view: VNode = element("ul")
///     .attr("class", "todo")
///     .child(element("li").key(1).child("write tests"))
///     .child(element("li").key(2).child("ship"))
///     .into();
/// assert!(matches!(view, VNode::Element(_)));
/// ```
#[derive(Clone)]
pub struct Element {
    pub(crate) kind: String,
    pub(crate) attributes: IndexMap<String, Binding<AttrValue>>,
    pub(crate) listeners: IndexMap<String, EventHandler>,
    pub(crate) children: Vec<VNode>,
    pub(crate) key: Option<Key>,
}

/// Start building an element of the given host kind.
pub fn element(kind: impl Into<String>) -> Element {
    Element {
        kind: kind.into(),
        attributes: IndexMap::new(),
        listeners: IndexMap::new(),
        children: Vec::new(),
        key: None,
    }
}

impl Element {
    /// A static attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes
            .insert(name.into(), Binding::Static(value.into()));
        self
    }

    /// An attribute bound to a cell or derived value.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Binding<AttrValue>>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn on(mut self, event: impl Into<String>, handler: impl Fn(&dyn Any) + 'static) -> Self {
        self.listeners.insert(event.into(), Rc::new(handler));
        self
    }

    /// Attach an already shared handler. Patching keeps the listener as
    /// long as the same `Rc` is passed again.
    pub fn on_shared(mut self, event: impl Into<String>, handler: EventHandler) -> Self {
        self.listeners.insert(event.into(), handler);
        self
    }

    pub fn child(mut self, child: impl Into<VNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<VNode>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("attributes", &self.attributes)
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .field("children", &self.children)
            .finish()
    }
}

/// A component: a render function with its own reactive scope.
///
/// Two components at the same position are the same instance when their
/// names and keys match; the instance then re-renders with the new
/// function instead of being recreated.
#[derive(Clone)]
pub struct Component {
    pub(crate) name: Cow<'static, str>,
    pub(crate) render: RenderFn,
    pub(crate) key: Option<Key>,
    pub(crate) boundary: Option<Rc<dyn Fn(&Error)>>,
}

/// A component whose render function cannot fail.
pub fn component(name: impl Into<Cow<'static, str>>, render: impl Fn() -> VNode + 'static) -> Component {
    Component {
        name: name.into(),
        render: Rc::new(move || Ok(render())),
        key: None,
        boundary: None,
    }
}

/// A component whose render function may fail. Failures go to the
/// nearest error boundary.
pub fn try_component<E>(
    name: impl Into<Cow<'static, str>>,
    render: impl Fn() -> Result<VNode, E> + 'static,
) -> Component
where
    E: Into<BoxError>,
{
    Component {
        name: name.into(),
        render: Rc::new(move || render().map_err(Into::into)),
        key: None,
        boundary: None,
    }
}

impl Component {
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Make this component an error boundary: errors raised while
    /// rendering it or anything below it go to `handler`.
    ///
    /// The handler is installed when the instance mounts; re-renders keep
    /// the first one.
    pub fn on_error(mut self, handler: impl Fn(&Error) + 'static) -> Self {
        self.boundary = Some(Rc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("boundary", &self.boundary.is_some())
            .finish()
    }
}
