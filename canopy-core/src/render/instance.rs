//! Component and list instances.
//!
//! A mounted component or list is a region: a run of sibling host nodes
//! ending in an empty text node, the anchor. An observer renders the
//! region's content; when anything it read changes, it renders again and
//! the content is patched in place, always before the anchor.
//!
//! Each region has an owner holding the render observer, a content scope
//! for whatever the content mounts and, for lists, one owner per row. The
//! owner also holds the region itself until it is disposed. The observer
//! owns nothing, so re-running it never tears down mounted content.

use std::borrow::Cow;
use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use tracing::trace;

use super::host::HostAdapter;
use super::keyed;
use super::list::{ListDriver, ListNode};
use super::reconciler::{move_before, mount_view, patch_slot, unmount_slot, Ctx, Mounted};
use super::vnode::{Component, Key, RenderFn};
use crate::error::{Error, Result};
use crate::reactive::{untracked, Cell, Observer, Owner};

/// Lifecycle of a mounted instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unmounted,
    Mounted,
    /// Terminal.
    Disposed,
}

pub(crate) struct Region<H: HostAdapter> {
    ctx: Ctx<H>,
    source: Source<H>,
    key: Option<Key>,
    parent: H::Node,
    anchor: H::Node,
    owner: Owner,
    content_scope: Owner,
    phase: Rc<StdCell<Phase>>,
    /// Bumped to force a re-render with a new render function or list.
    revision: Cell<u64>,
}

enum Source<H: HostAdapter> {
    Component {
        name: Cow<'static, str>,
        render: RefCell<RenderFn>,
        content: RefCell<Option<Mounted<H>>>,
    },
    List {
        driver: RefCell<Rc<dyn ListDriver>>,
        rows: RefCell<Vec<Row<H>>>,
    },
}

struct Row<H: HostAdapter> {
    key: Key,
    owner: Owner,
    mounted: Mounted<H>,
}

impl<H: HostAdapter> Region<H> {
    pub(crate) fn mount_component(
        ctx: &Ctx<H>,
        component: Component,
        parent: &H::Node,
        before: Option<&H::Node>,
    ) -> Result<Rc<Self>> {
        let Component {
            name,
            render,
            key,
            boundary,
        } = component;
        let source = Source::Component {
            name,
            render: RefCell::new(render),
            content: RefCell::new(None),
        };
        Self::mount(ctx, source, key, boundary, parent, before)
    }

    pub(crate) fn mount_list(
        ctx: &Ctx<H>,
        list: ListNode,
        parent: &H::Node,
        before: Option<&H::Node>,
    ) -> Result<Rc<Self>> {
        let source = Source::List {
            driver: RefCell::new(list.driver),
            rows: RefCell::new(Vec::new()),
        };
        Self::mount(ctx, source, None, None, parent, before)
    }

    fn mount(
        ctx: &Ctx<H>,
        source: Source<H>,
        key: Option<Key>,
        boundary: Option<Rc<dyn Fn(&Error)>>,
        parent: &H::Node,
        before: Option<&H::Node>,
    ) -> Result<Rc<Self>> {
        let anchor = ctx.create_text_node("")?;
        ctx.insert(parent, &anchor, before)?;

        let owner = Owner::new();
        if let Some(handler) = boundary {
            owner.on_error(move |err| handler(err));
        }
        let (content_scope, revision) = owner.run_with(|| (Owner::new(), Cell::new(0u64)));
        let phase = Rc::new(StdCell::new(Phase::Unmounted));
        let disposed = phase.clone();
        owner.on_cleanup(move || disposed.set(Phase::Disposed));

        let region = Rc::new(Self {
            ctx: ctx.clone(),
            source,
            key,
            parent: parent.clone(),
            anchor,
            owner,
            content_scope,
            phase,
            revision,
        });
        trace!(region = %region.describe(), owner = %region.owner.id(), "mounting");
        // The owner keeps the region alive until it is disposed, whoever
        // else drops their handle to it.
        let keep = region.clone();
        region.owner.on_cleanup(move || drop(keep));

        let weak = Rc::downgrade(&region);
        let observer = region.owner.run_with(|| {
            Observer::with_body(move || match weak.upgrade() {
                Some(region) => region.render(),
                None => Ok(()),
            })
        });
        if let Err(err) = observer {
            region.unmount(true)?;
            return Err(err);
        }
        if region.phase.get() == Phase::Unmounted {
            region.phase.set(Phase::Mounted);
        }
        Ok(region)
    }

    pub(crate) fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    fn describe(&self) -> &str {
        match &self.source {
            Source::Component { name, .. } => &**name,
            Source::List { .. } => "list",
        }
    }

    /// Whether `component` is this instance rendered again.
    pub(crate) fn accepts_component(&self, component: &Component) -> bool {
        match &self.source {
            Source::Component { name, .. } => *name == component.name && self.key == component.key,
            Source::List { .. } => false,
        }
    }

    pub(crate) fn accepts_list(&self, list: &ListNode) -> bool {
        match &self.source {
            Source::List { driver, .. } => driver.borrow().is_compatible(list.driver.as_ref()),
            Source::Component { .. } => false,
        }
    }

    /// Re-render with a new render function.
    pub(crate) fn rerender(&self, next: RenderFn) -> Result<()> {
        if let Source::Component { render, .. } = &self.source {
            *render.borrow_mut() = next;
        }
        self.revision.try_update(|revision| revision + 1)
    }

    /// Switch to a new list description, keeping existing rows.
    pub(crate) fn adopt_list(&self, list: ListNode) -> Result<()> {
        if let Source::List { driver, .. } = &self.source {
            let previous = driver.replace(list.driver.clone());
            list.driver.adopt(previous.as_ref());
        }
        self.revision.try_update(|revision| revision + 1)
    }

    /// The observer body.
    fn render(&self) -> Result<()> {
        if self.phase.get() == Phase::Disposed {
            return Ok(());
        }
        self.revision.get();

        match &self.source {
            Source::Component { name, render, content } => {
                let render = render.borrow().clone();
                let view = render().map_err(Error::Evaluation)?;
                trace!(component = %name, "rendered");

                untracked(|| {
                    self.content_scope.run_with(|| -> Result<()> {
                        let previous = content.borrow_mut().take();
                        let next = match previous {
                            Some(previous) => {
                                patch_slot(&self.ctx, previous, view, &self.parent, Some(&self.anchor))?
                            }
                            None => mount_view(&self.ctx, view, &self.parent, Some(&self.anchor))?,
                        };
                        *content.borrow_mut() = Some(next);
                        Ok(())
                    })
                })
            }
            Source::List { driver, .. } => {
                let driver = driver.borrow().clone();
                let keys = driver.refresh()?;
                untracked(|| {
                    self.content_scope
                        .run_with(|| self.reconcile_rows(driver.as_ref(), keys))
                })
            }
        }
    }

    fn reconcile_rows(&self, driver: &dyn ListDriver, keys: Vec<Key>) -> Result<()> {
        let Source::List { rows, .. } = &self.source else {
            return Ok(());
        };
        let plan = {
            let current = rows.borrow();
            let old_keys: Vec<&Key> = current.iter().map(|row| &row.key).collect();
            let new_keys: Vec<&Key> = keys.iter().collect();
            keyed::plan(&old_keys, &new_keys)?
        };
        trace!(
            rows = keys.len(),
            moves = plan.moves(),
            removed = plan.removed.len(),
            inserted = plan.insertions(),
            "reconciling list"
        );

        let mut old: Vec<Option<Row<H>>> = rows.borrow_mut().drain(..).map(Some).collect();
        for &index in &plan.removed {
            if let Some(row) = old[index].take() {
                driver.forget(&row.key);
                self.remove_row(row)?;
            }
        }

        let mut reference = self.anchor.clone();
        let mut next = Vec::with_capacity(keys.len());
        for (index, key) in keys.into_iter().enumerate().rev() {
            let row = match plan.sources[index].and_then(|source| old[source].take()) {
                Some(row) => {
                    if plan.moved[index] {
                        move_before(&self.ctx, &row.mounted, &self.parent, Some(&reference))?;
                    }
                    row
                }
                None => self.insert_row(driver, key, &reference)?,
            };
            if let Some(first) = row.mounted.first_node() {
                reference = first;
            }
            next.push(row);
        }
        next.reverse();
        *rows.borrow_mut() = next;
        Ok(())
    }

    fn insert_row(&self, driver: &dyn ListDriver, key: Key, before: &H::Node) -> Result<Row<H>> {
        let owner = Owner::new();
        let mounted = owner.run_with(|| {
            let view = driver.render(&key)?;
            mount_view(&self.ctx, view, &self.parent, Some(before))
        });
        match mounted {
            Ok(mounted) => Ok(Row { key, owner, mounted }),
            Err(err) => {
                owner.dispose();
                driver.forget(&key);
                Err(err)
            }
        }
    }

    fn remove_row(&self, row: Row<H>) -> Result<()> {
        let detached = unmount_slot(&self.ctx, row.mounted, &self.parent, true);
        row.owner.dispose();
        detached
    }

    /// The first host node of the region. The anchor when there is no
    /// content.
    pub(crate) fn first_node(&self) -> H::Node {
        let first = match &self.source {
            Source::Component { content, .. } => content.borrow().as_ref().and_then(Mounted::first_node),
            Source::List { rows, .. } => rows.borrow().iter().find_map(|row| row.mounted.first_node()),
        };
        first.unwrap_or_else(|| self.anchor.clone())
    }

    /// Content nodes followed by the anchor.
    pub(crate) fn host_nodes(&self, out: &mut Vec<H::Node>) {
        match &self.source {
            Source::Component { content, .. } => {
                if let Some(content) = content.borrow().as_ref() {
                    content.host_nodes(out);
                }
            }
            Source::List { rows, .. } => {
                for row in rows.borrow().iter() {
                    row.mounted.host_nodes(out);
                }
            }
        }
        out.push(self.anchor.clone());
    }

    /// Dispose the region. With `detach`, its host nodes are removed too.
    pub(crate) fn unmount(&self, detach: bool) -> Result<()> {
        let mut nodes = Vec::new();
        if detach {
            self.host_nodes(&mut nodes);
        }
        self.owner.dispose();
        self.phase.set(Phase::Disposed);
        trace!(region = %self.describe(), "unmounted");

        match &self.source {
            Source::Component { content, .. } => drop(content.take()),
            Source::List { rows, .. } => drop(rows.take()),
        }

        for node in &nodes {
            self.ctx.remove_child(&self.parent, node)?;
        }
        Ok(())
    }
}
