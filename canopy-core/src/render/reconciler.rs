//! Reconciler
//!
//! Turns [`VNode`] trees into host nodes and keeps them in sync.
//!
//! # How It Works
//!
//! 1. Mounting walks the tree and creates host nodes bottom-up. Static
//!    attributes and text are written once. Each reactive binding gets its
//!    own observer, so a change touches exactly one host attribute or text
//!    node.
//!
//! 2. Components and lists become regions (see `instance`): an observer
//!    re-renders them when what they read changes, and the new tree is
//!    patched against the mounted one.
//!
//! 3. Patching keeps an element when its kind and key match, diffs
//!    attributes and listeners, and reconciles children. Keyed children
//!    are matched by key, unkeyed ones in order among themselves, and
//!    only children outside the longest run of kept positions move.
//!    Anything else is replaced.
//!
//! All reactive state created for a subtree hangs off an [`Owner`], so
//! unmounting is a matter of disposing it and detaching the top host nodes.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, debug_span, trace, warn};

use super::binding::Binding;
use super::host::HostAdapter;
use super::instance::{Phase, Region};
use super::keyed;
use super::vnode::{AttrPatch, AttrValue, Attributes, Element, EventHandler, Key, VNode};
use crate::error::{Error, Result};
use crate::reactive::{Observer, Owner, Runtime};

/// Shared handle to the host adapter.
///
/// Borrows of the host never outlive a single host call, so observers may
/// run between any two of them.
pub(crate) struct Ctx<H: HostAdapter> {
    host: Rc<RefCell<H>>,
}

impl<H: HostAdapter> Clone for Ctx<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
        }
    }
}

impl<H: HostAdapter> Ctx<H> {
    pub(crate) fn create_node(&self, kind: &str, attributes: &Attributes) -> Result<H::Node> {
        Ok(self.host.borrow_mut().create_node(kind, attributes)?)
    }

    pub(crate) fn update_node(&self, node: &H::Node, changes: &AttrPatch) -> Result<()> {
        Ok(self.host.borrow_mut().update_node(node, changes)?)
    }

    pub(crate) fn create_text_node(&self, text: &str) -> Result<H::Node> {
        Ok(self.host.borrow_mut().create_text_node(text)?)
    }

    pub(crate) fn update_text_node(&self, node: &H::Node, text: &str) -> Result<()> {
        Ok(self.host.borrow_mut().update_text_node(node, text)?)
    }

    /// Insert `child` before `before`, or append it when there is no
    /// reference node.
    pub(crate) fn insert(&self, parent: &H::Node, child: &H::Node, before: Option<&H::Node>) -> Result<()> {
        let mut host = self.host.borrow_mut();
        match before {
            Some(reference) => host.insert_before(parent, child, reference)?,
            None => host.append_child(parent, child)?,
        }
        Ok(())
    }

    pub(crate) fn remove_child(&self, parent: &H::Node, child: &H::Node) -> Result<()> {
        Ok(self.host.borrow_mut().remove_child(parent, child)?)
    }

    fn add_listener(&self, node: &H::Node, event: &str, handler: &EventHandler) -> Result<()> {
        Ok(self.host.borrow_mut().add_event_listener(node, event, handler)?)
    }

    fn remove_listener(&self, node: &H::Node, event: &str, handler: &EventHandler) -> Result<()> {
        Ok(self.host.borrow_mut().remove_event_listener(node, event, handler)?)
    }
}

/// The mounted counterpart of a [`VNode`].
pub(crate) enum Mounted<H: HostAdapter> {
    Element(Box<ElementSlot<H>>),
    Text(TextSlot<H>),
    Region(Rc<Region<H>>),
    Fragment(Vec<Mounted<H>>),
}

pub(crate) struct ElementSlot<H: HostAdapter> {
    node: H::Node,
    kind: String,
    key: Option<Key>,
    attributes: IndexMap<String, AttrSlot>,
    listeners: IndexMap<String, EventHandler>,
    children: Vec<Mounted<H>>,
    /// Owns the attribute observers and everything mounted below.
    scope: Owner,
}

struct AttrSlot {
    binding: Binding<AttrValue>,
    /// Last value written to the host.
    current: Rc<RefCell<AttrValue>>,
    observer: Option<Observer>,
}

pub(crate) struct TextSlot<H: HostAdapter> {
    node: H::Node,
    binding: Binding<String>,
    current: Rc<RefCell<String>>,
    observer: Option<Observer>,
}

impl<H: HostAdapter> Mounted<H> {
    fn key(&self) -> Option<&Key> {
        match self {
            Self::Element(element) => element.key.as_ref(),
            Self::Region(region) => region.key(),
            Self::Text(_) | Self::Fragment(_) => None,
        }
    }

    /// The first host node of this slot in document order.
    pub(crate) fn first_node(&self) -> Option<H::Node> {
        match self {
            Self::Element(element) => Some(element.node.clone()),
            Self::Text(text) => Some(text.node.clone()),
            Self::Region(region) => Some(region.first_node()),
            Self::Fragment(children) => children.iter().find_map(Mounted::first_node),
        }
    }

    /// Every top-level host node of this slot, in document order.
    pub(crate) fn host_nodes(&self, out: &mut Vec<H::Node>) {
        match self {
            Self::Element(element) => out.push(element.node.clone()),
            Self::Text(text) => out.push(text.node.clone()),
            Self::Region(region) => region.host_nodes(out),
            Self::Fragment(children) => {
                for child in children {
                    child.host_nodes(out);
                }
            }
        }
    }
}

// ---- Mount ----

/// Create host nodes for `view` and insert them into `parent` before
/// `before` (or at the end).
pub(crate) fn mount_view<H: HostAdapter>(
    ctx: &Ctx<H>,
    view: VNode,
    parent: &H::Node,
    before: Option<&H::Node>,
) -> Result<Mounted<H>> {
    match view {
        VNode::Element(element) => {
            let slot = mount_element(ctx, element)?;
            ctx.insert(parent, &slot.node, before)?;
            Ok(Mounted::Element(Box::new(slot)))
        }
        VNode::Text(binding) => {
            let slot = mount_text(ctx, binding)?;
            ctx.insert(parent, &slot.node, before)?;
            Ok(Mounted::Text(slot))
        }
        VNode::Component(component) => {
            Region::mount_component(ctx, component, parent, before).map(Mounted::Region)
        }
        VNode::List(list) => Region::mount_list(ctx, list, parent, before).map(Mounted::Region),
        VNode::Fragment(children) => children
            .into_iter()
            .map(|child| mount_view(ctx, child, parent, before))
            .collect::<Result<Vec<_>>>()
            .map(Mounted::Fragment),
    }
}

fn mount_element<H: HostAdapter>(ctx: &Ctx<H>, element: Element) -> Result<ElementSlot<H>> {
    let Element {
        kind,
        attributes,
        listeners,
        children,
        key,
    } = element;
    let scope = Owner::new();

    let mounted = scope.run_with(|| -> Result<_> {
        let mut initial = Attributes::with_capacity(attributes.len());
        for (name, binding) in &attributes {
            initial.insert(name.clone(), binding.try_get_untracked()?);
        }
        let node = ctx.create_node(&kind, &initial)?;

        let mut slots = IndexMap::with_capacity(attributes.len());
        for ((name, binding), value) in attributes.into_iter().zip(initial.into_values()) {
            let slot = attr_slot(ctx, &node, &name, binding, value)?;
            slots.insert(name, slot);
        }
        for (event, handler) in &listeners {
            ctx.add_listener(&node, event, handler)?;
        }
        let children = children
            .into_iter()
            .map(|child| mount_view(ctx, child, &node, None))
            .collect::<Result<Vec<_>>>()?;
        Ok((node, slots, children))
    });

    match mounted {
        Ok((node, attributes, children)) => Ok(ElementSlot {
            node,
            kind,
            key,
            attributes,
            listeners,
            children,
            scope,
        }),
        Err(err) => {
            scope.dispose();
            Err(err)
        }
    }
}

fn mount_text<H: HostAdapter>(ctx: &Ctx<H>, binding: Binding<String>) -> Result<TextSlot<H>> {
    let value = binding.try_get_untracked()?;
    let node = ctx.create_text_node(&value)?;
    let current = Rc::new(RefCell::new(value));
    let observer = if binding.is_reactive() {
        Some(bind_text(ctx, &node, binding.clone(), current.clone())?)
    } else {
        None
    };
    Ok(TextSlot {
        node,
        binding,
        current,
        observer,
    })
}

fn attr_slot<H: HostAdapter>(
    ctx: &Ctx<H>,
    node: &H::Node,
    name: &str,
    binding: Binding<AttrValue>,
    value: AttrValue,
) -> Result<AttrSlot> {
    let current = Rc::new(RefCell::new(value));
    let observer = if binding.is_reactive() {
        Some(bind_attribute(ctx, node, name, binding.clone(), current.clone())?)
    } else {
        None
    };
    Ok(AttrSlot {
        binding,
        current,
        observer,
    })
}

/// Keep one host attribute in sync with a reactive binding.
fn bind_attribute<H: HostAdapter>(
    ctx: &Ctx<H>,
    node: &H::Node,
    name: &str,
    binding: Binding<AttrValue>,
    current: Rc<RefCell<AttrValue>>,
) -> Result<Observer> {
    let (ctx, node, name) = (ctx.clone(), node.clone(), name.to_owned());
    Observer::with_body(move || {
        let value = binding.try_get()?;
        if *current.borrow() == value {
            return Ok(());
        }
        trace!(attribute = %name, %value, "binding changed");
        let mut changes = AttrPatch::with_capacity(1);
        changes.insert(name.clone(), Some(value.clone()));
        ctx.update_node(&node, &changes)?;
        *current.borrow_mut() = value;
        Ok(())
    })
}

fn bind_text<H: HostAdapter>(
    ctx: &Ctx<H>,
    node: &H::Node,
    binding: Binding<String>,
    current: Rc<RefCell<String>>,
) -> Result<Observer> {
    let (ctx, node) = (ctx.clone(), node.clone());
    Observer::with_body(move || {
        let value = binding.try_get()?;
        if *current.borrow() == value {
            return Ok(());
        }
        ctx.update_text_node(&node, &value)?;
        *current.borrow_mut() = value;
        Ok(())
    })
}

// ---- Patch ----

/// Bring a mounted slot in line with `view`.
///
/// `next` is the host node following the slot, used as the insertion
/// point when the slot has no host nodes of its own.
pub(crate) fn patch_slot<H: HostAdapter>(
    ctx: &Ctx<H>,
    slot: Mounted<H>,
    view: VNode,
    parent: &H::Node,
    next: Option<&H::Node>,
) -> Result<Mounted<H>> {
    match (slot, view) {
        (Mounted::Element(mut element), VNode::Element(view))
            if element.kind == view.kind && element.key == view.key =>
        {
            patch_element(ctx, &mut element, view)?;
            Ok(Mounted::Element(element))
        }
        (Mounted::Text(mut text), VNode::Text(binding)) => {
            patch_text(ctx, &mut text, binding)?;
            Ok(Mounted::Text(text))
        }
        (Mounted::Region(region), VNode::Component(component)) if region.accepts_component(&component) => {
            region.rerender(component.render)?;
            Ok(Mounted::Region(region))
        }
        (Mounted::Region(region), VNode::List(list)) if region.accepts_list(&list) => {
            region.adopt_list(list)?;
            Ok(Mounted::Region(region))
        }
        (Mounted::Fragment(children), VNode::Fragment(views)) => {
            reconcile_children(ctx, children, views, parent, next).map(Mounted::Fragment)
        }
        (slot, view) => replace(ctx, slot, view, parent, next),
    }
}

fn replace<H: HostAdapter>(
    ctx: &Ctx<H>,
    slot: Mounted<H>,
    view: VNode,
    parent: &H::Node,
    next: Option<&H::Node>,
) -> Result<Mounted<H>> {
    let before = slot.first_node().or_else(|| next.cloned());
    let mounted = mount_view(ctx, view, parent, before.as_ref())?;
    unmount_slot(ctx, slot, parent, true)?;
    Ok(mounted)
}

fn patch_element<H: HostAdapter>(ctx: &Ctx<H>, element: &mut ElementSlot<H>, view: Element) -> Result<()> {
    let Element {
        attributes,
        listeners,
        children,
        ..
    } = view;
    let scope = element.scope.clone();

    scope.run_with(|| -> Result<()> {
        let mut changes = AttrPatch::new();
        let mut previous = std::mem::take(&mut element.attributes);
        let mut next = IndexMap::with_capacity(attributes.len());

        for (name, binding) in attributes {
            let old = match previous.shift_remove(&name) {
                Some(old) if old.binding.same_as(&binding) => {
                    next.insert(name, old);
                    continue;
                }
                old => old,
            };
            if let Some(observer) = old.as_ref().and_then(|old| old.observer.as_ref()) {
                observer.dispose();
            }
            let value = binding.try_get_untracked()?;
            if old.as_ref().map_or(true, |old| *old.current.borrow() != value) {
                changes.insert(name.clone(), Some(value.clone()));
            }
            let slot = attr_slot(ctx, &element.node, &name, binding, value)?;
            next.insert(name, slot);
        }
        for (name, old) in previous {
            if let Some(observer) = old.observer {
                observer.dispose();
            }
            changes.insert(name, None);
        }
        element.attributes = next;
        if !changes.is_empty() {
            ctx.update_node(&element.node, &changes)?;
        }

        let previous = std::mem::take(&mut element.listeners);
        for (event, handler) in &previous {
            if !listeners.get(event).is_some_and(|next| Rc::ptr_eq(next, handler)) {
                ctx.remove_listener(&element.node, event, handler)?;
            }
        }
        for (event, handler) in &listeners {
            if !previous.get(event).is_some_and(|old| Rc::ptr_eq(old, handler)) {
                ctx.add_listener(&element.node, event, handler)?;
            }
        }
        element.listeners = listeners;

        let old = std::mem::take(&mut element.children);
        element.children = reconcile_children(ctx, old, children, &element.node, None)?;
        Ok(())
    })
}

fn patch_text<H: HostAdapter>(ctx: &Ctx<H>, text: &mut TextSlot<H>, binding: Binding<String>) -> Result<()> {
    if text.binding.same_as(&binding) {
        return Ok(());
    }
    if let Some(observer) = text.observer.take() {
        observer.dispose();
    }
    let value = binding.try_get_untracked()?;
    if *text.current.borrow() != value {
        ctx.update_text_node(&text.node, &value)?;
        *text.current.borrow_mut() = value;
    }
    if binding.is_reactive() {
        text.observer = Some(bind_text(ctx, &text.node, binding.clone(), text.current.clone())?);
    }
    text.binding = binding;
    Ok(())
}

/// Reconcile a list of mounted siblings against new views.
///
/// Siblings are processed from the last to the first, each inserted or
/// moved before the first host node of the sibling after it (or `end`).
pub(crate) fn reconcile_children<H: HostAdapter>(
    ctx: &Ctx<H>,
    old: Vec<Mounted<H>>,
    views: Vec<VNode>,
    parent: &H::Node,
    end: Option<&H::Node>,
) -> Result<Vec<Mounted<H>>> {
    let plan = {
        let old_keys: Vec<Option<&Key>> = old.iter().map(Mounted::key).collect();
        let new_keys: Vec<Option<&Key>> = views.iter().map(VNode::key).collect();
        keyed::plan_mixed(&old_keys, &new_keys)?
    };
    if plan.moves() > 0 || !plan.removed.is_empty() {
        trace!(
            moves = plan.moves(),
            removed = plan.removed.len(),
            inserted = plan.insertions(),
            "reconciling children"
        );
    }
    let keyed::Plan {
        removed,
        sources,
        moved,
    } = plan;

    let mut old: Vec<Option<Mounted<H>>> = old.into_iter().map(Some).collect();
    for index in removed {
        if let Some(slot) = old[index].take() {
            unmount_slot(ctx, slot, parent, true)?;
        }
    }

    let mut reference = end.cloned();
    let mut mounted = Vec::with_capacity(views.len());
    for (index, view) in views.into_iter().enumerate().rev() {
        let slot = match sources[index].and_then(|source| old[source].take()) {
            Some(slot) => {
                if moved[index] {
                    move_before(ctx, &slot, parent, reference.as_ref())?;
                }
                patch_slot(ctx, slot, view, parent, reference.as_ref())?
            }
            None => mount_view(ctx, view, parent, reference.as_ref())?,
        };
        if let Some(first) = slot.first_node() {
            reference = Some(first);
        }
        mounted.push(slot);
    }
    mounted.reverse();
    Ok(mounted)
}

/// Move every host node of `slot` before `before`, keeping their order.
pub(crate) fn move_before<H: HostAdapter>(
    ctx: &Ctx<H>,
    slot: &Mounted<H>,
    parent: &H::Node,
    before: Option<&H::Node>,
) -> Result<()> {
    let mut nodes = Vec::new();
    slot.host_nodes(&mut nodes);
    for node in &nodes {
        ctx.insert(parent, node, before)?;
    }
    Ok(())
}

// ---- Unmount ----

/// Dispose the reactive state of `slot`. With `detach`, its top-level
/// host nodes are also removed from `parent`; nested nodes go with them.
pub(crate) fn unmount_slot<H: HostAdapter>(
    ctx: &Ctx<H>,
    slot: Mounted<H>,
    parent: &H::Node,
    detach: bool,
) -> Result<()> {
    match slot {
        Mounted::Element(element) => {
            element.scope.dispose();
            if detach {
                ctx.remove_child(parent, &element.node)?;
            }
        }
        Mounted::Text(text) => {
            if let Some(observer) = text.observer {
                observer.dispose();
            }
            if detach {
                ctx.remove_child(parent, &text.node)?;
            }
        }
        Mounted::Region(region) => region.unmount(detach)?,
        Mounted::Fragment(children) => {
            for child in children {
                unmount_slot(ctx, child, parent, detach)?;
            }
        }
    }
    Ok(())
}

// ---- Public API ----

/// Mounts views into host containers.
///
/// # Example
///
/// ```rust,ignore
/// let reconciler = Reconciler::new(MyHost::default());
/// let count = Cell::new(0);
/// let view = component("counter", {
///     let count = count.clone();
///     move || element("p").child(format!("count: {}", count.get())).into()
/// });
/// let mut handle = reconciler.mount(view, root_node)?;
/// count.set(1); // the component re-renders and patches the text
/// handle.unmount()?;
/// ```
pub struct Reconciler<H: HostAdapter> {
    runtime: Runtime,
    ctx: Ctx<H>,
}

impl<H: HostAdapter> Reconciler<H> {
    /// A reconciler on the ambient runtime.
    pub fn new(host: H) -> Self {
        Self::with_runtime(Runtime::current(), host)
    }

    pub fn with_runtime(runtime: Runtime, host: H) -> Self {
        Self {
            runtime,
            ctx: Ctx {
                host: Rc::new(RefCell::new(host)),
            },
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Borrow the host adapter. Do not hold the borrow while writing cells.
    pub fn host(&self) -> Ref<'_, H> {
        self.ctx.host.borrow()
    }

    pub fn host_mut(&self) -> RefMut<'_, H> {
        self.ctx.host.borrow_mut()
    }

    /// Mount `view` at the end of `container`.
    ///
    /// The mounted tree is owned by the ambient owner, so error boundaries
    /// installed around the call apply to it. Host failures and unhandled
    /// component errors abort the mount: the partially mounted tree is torn
    /// down and the error returned.
    pub fn mount(&self, view: impl Into<VNode>, container: H::Node) -> Result<MountHandle<H>> {
        let view = view.into();
        let _span = debug_span!("mount", container = ?container).entered();

        self.runtime.enter(|| {
            let owner = Owner::new();
            let (mounted, flushed) = self
                .runtime
                .inner
                .batch_settled(|| owner.run_with(|| mount_view(&self.ctx, view, &container, None)));
            let root = match mounted {
                Ok(root) => root,
                Err(err) => {
                    owner.dispose();
                    return Err(err);
                }
            };

            let mut handle = MountHandle {
                ctx: self.ctx.clone(),
                runtime: self.runtime.clone(),
                owner,
                container,
                root: Some(root),
                phase: Phase::Mounted,
            };
            if let Err(err) = flushed {
                if let Err(cleanup) = handle.unmount() {
                    warn!(error = %cleanup, "teardown after a failed mount also failed");
                }
                return Err(err);
            }
            debug!(owner = %handle.owner.id(), "mounted");
            Ok(handle)
        })
    }
}

impl<H: HostAdapter> fmt::Debug for Reconciler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

/// A mounted view.
///
/// Dropping the handle leaves the view mounted and reactive: components
/// keep re-rendering until the owner they were mounted under is disposed.
/// Call [`unmount`](Self::unmount) to tear it down.
pub struct MountHandle<H: HostAdapter> {
    ctx: Ctx<H>,
    runtime: Runtime,
    owner: Owner,
    container: H::Node,
    root: Option<Mounted<H>>,
    phase: Phase,
}

impl<H: HostAdapter> MountHandle<H> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The root owner of the mounted tree. Error boundaries installed on it
    /// catch errors from every component below.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn container(&self) -> &H::Node {
        &self.container
    }

    /// Top-level host nodes inserted into the container, in order.
    pub fn host_nodes(&self) -> Vec<H::Node> {
        let mut nodes = Vec::new();
        if let Some(root) = &self.root {
            root.host_nodes(&mut nodes);
        }
        nodes
    }

    /// Patch the mounted tree against a new root view.
    ///
    /// A failed patch leaves the host tree as far as it got and disposes
    /// the handle.
    pub fn update(&mut self, view: impl Into<VNode>) -> Result<()> {
        let Some(root) = self.root.take() else {
            return Err(Error::Disposed { id: self.owner.id() });
        };
        let view = view.into();
        let _span = debug_span!("update").entered();

        let (ctx, owner, container) = (&self.ctx, &self.owner, &self.container);
        let (patched, flushed) = self.runtime.enter(|| {
            self.runtime
                .inner
                .batch_settled(|| owner.run_with(|| patch_slot(ctx, root, view, container, None)))
        });
        match patched {
            Ok(root) => self.root = Some(root),
            Err(err) => {
                self.owner.dispose();
                self.phase = Phase::Disposed;
                return Err(err);
            }
        }
        flushed
    }

    /// Remove the view from the container and dispose everything it owns.
    /// Idempotent.
    pub fn unmount(&mut self) -> Result<()> {
        if self.phase == Phase::Disposed {
            return Ok(());
        }
        self.phase = Phase::Disposed;
        let _span = debug_span!("unmount").entered();

        let detached = match self.root.take() {
            Some(root) => self
                .runtime
                .enter(|| unmount_slot(&self.ctx, root, &self.container, true)),
            None => Ok(()),
        };
        self.owner.dispose();
        debug!(owner = %self.owner.id(), "unmounted");
        detached
    }
}

impl<H: HostAdapter> fmt::Debug for MountHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountHandle")
            .field("container", &self.container)
            .field("phase", &self.phase)
            .field("owner", &self.owner.id())
            .finish()
    }
}
