//! In-memory host adapter that records every call it receives.

#![allow(dead_code)]

use canopy_core::render::{AttrPatch, AttrValue, Attributes, EventHandler, HostAdapter};
use canopy_core::HostError;

pub type NodeRef = usize;

/// One host call, as seen by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Create(NodeRef, String),
    CreateText(NodeRef, String),
    Update(NodeRef, AttrPatch),
    UpdateText(NodeRef, String),
    Append(NodeRef, NodeRef),
    InsertBefore(NodeRef, NodeRef, NodeRef),
    Remove(NodeRef, NodeRef),
    Listen(NodeRef, String),
    Unlisten(NodeRef, String),
}

impl Op {
    pub fn is_create(&self) -> bool {
        matches!(self, Op::Create(..) | Op::CreateText(..))
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Op::Append(..) | Op::InsertBefore(..))
    }
}

struct HostNode {
    kind: Option<String>,
    text: String,
    attributes: Attributes,
    children: Vec<NodeRef>,
    parent: Option<NodeRef>,
    listeners: Vec<(String, EventHandler)>,
}

impl HostNode {
    fn element(kind: &str, attributes: Attributes) -> Self {
        Self {
            kind: Some(kind.to_owned()),
            text: String::new(),
            attributes,
            children: Vec::new(),
            parent: None,
            listeners: Vec::new(),
        }
    }

    fn text(text: &str) -> Self {
        Self {
            kind: None,
            text: text.to_owned(),
            attributes: Attributes::new(),
            children: Vec::new(),
            parent: None,
            listeners: Vec::new(),
        }
    }
}

/// A DOM-like tree. Node 0 is the root container.
pub struct TestHost {
    nodes: Vec<HostNode>,
    ops: Vec<Op>,
    failing_kind: Option<String>,
}

impl Default for TestHost {
    fn default() -> Self {
        Self {
            nodes: vec![HostNode::element("#root", Attributes::new())],
            ops: Vec::new(),
            failing_kind: None,
        }
    }
}

impl TestHost {
    pub const ROOT: NodeRef = 0;

    /// Make `create_node` fail for elements of `kind`.
    pub fn fail_on(&mut self, kind: &str) {
        self.failing_kind = Some(kind.to_owned());
    }

    pub fn take_ops(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.ops)
    }

    /// Children of `node`, skipping empty text nodes.
    pub fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .filter(|&child| !self.is_empty_text(child))
            .collect()
    }

    /// Every child of `node`, including empty text nodes.
    pub fn raw_children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.nodes[node].children.clone()
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes[node].parent
    }

    pub fn kind(&self, node: NodeRef) -> Option<&str> {
        self.nodes[node].kind.as_deref()
    }

    pub fn text(&self, node: NodeRef) -> &str {
        &self.nodes[node].text
    }

    pub fn attribute(&self, node: NodeRef, name: &str) -> Option<&AttrValue> {
        self.nodes[node].attributes.get(name)
    }

    pub fn listener(&self, node: NodeRef, event: &str) -> Option<EventHandler> {
        self.nodes[node]
            .listeners
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, handler)| handler.clone())
    }

    /// Serialize the subtree below `node` as markup, skipping empty text.
    pub fn render(&self, node: NodeRef) -> String {
        self.nodes[node]
            .children
            .iter()
            .map(|&child| self.render_node(child))
            .collect()
    }

    fn render_node(&self, node: NodeRef) -> String {
        let host_node = &self.nodes[node];
        match &host_node.kind {
            None => host_node.text.clone(),
            Some(kind) => {
                let attributes: String = host_node
                    .attributes
                    .iter()
                    .map(|(name, value)| format!(" {name}=\"{value}\""))
                    .collect();
                format!("<{kind}{attributes}>{}</{kind}>", self.render(node))
            }
        }
    }

    fn is_empty_text(&self, node: NodeRef) -> bool {
        let host_node = &self.nodes[node];
        host_node.kind.is_none() && host_node.text.is_empty()
    }

    fn check(&self, node: NodeRef) -> Result<(), HostError> {
        if node < self.nodes.len() {
            Ok(())
        } else {
            Err(HostError::MissingNode(format!("#{node}")))
        }
    }

    fn detach(&mut self, child: NodeRef) {
        if let Some(parent) = self.nodes[child].parent.take() {
            self.nodes[parent].children.retain(|&c| c != child);
        }
    }
}

impl HostAdapter for TestHost {
    type Node = NodeRef;

    fn create_node(&mut self, kind: &str, attributes: &Attributes) -> Result<NodeRef, HostError> {
        if self.failing_kind.as_deref() == Some(kind) {
            return Err(HostError::Backend(format!("cannot create <{kind}>").into()));
        }
        let id = self.nodes.len();
        self.nodes.push(HostNode::element(kind, attributes.clone()));
        self.ops.push(Op::Create(id, kind.to_owned()));
        Ok(id)
    }

    fn update_node(&mut self, node: &NodeRef, changes: &AttrPatch) -> Result<(), HostError> {
        self.check(*node)?;
        for (name, value) in changes {
            match value {
                Some(value) => {
                    self.nodes[*node].attributes.insert(name.clone(), value.clone());
                }
                None => {
                    self.nodes[*node].attributes.shift_remove(name);
                }
            }
        }
        self.ops.push(Op::Update(*node, changes.clone()));
        Ok(())
    }

    fn create_text_node(&mut self, text: &str) -> Result<NodeRef, HostError> {
        let id = self.nodes.len();
        self.nodes.push(HostNode::text(text));
        self.ops.push(Op::CreateText(id, text.to_owned()));
        Ok(id)
    }

    fn update_text_node(&mut self, node: &NodeRef, text: &str) -> Result<(), HostError> {
        self.check(*node)?;
        self.nodes[*node].text = text.to_owned();
        self.ops.push(Op::UpdateText(*node, text.to_owned()));
        Ok(())
    }

    fn append_child(&mut self, parent: &NodeRef, child: &NodeRef) -> Result<(), HostError> {
        self.check(*parent)?;
        self.check(*child)?;
        self.detach(*child);
        self.nodes[*parent].children.push(*child);
        self.nodes[*child].parent = Some(*parent);
        self.ops.push(Op::Append(*parent, *child));
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: &NodeRef,
        child: &NodeRef,
        reference: &NodeRef,
    ) -> Result<(), HostError> {
        self.check(*parent)?;
        self.check(*child)?;
        if self.nodes[*reference].parent != Some(*parent) {
            return Err(HostError::MissingNode(format!("#{reference} in #{parent}")));
        }
        self.detach(*child);
        let position = self.nodes[*parent]
            .children
            .iter()
            .position(|&c| c == *reference)
            .ok_or_else(|| HostError::MissingNode(format!("#{reference}")))?;
        self.nodes[*parent].children.insert(position, *child);
        self.nodes[*child].parent = Some(*parent);
        self.ops.push(Op::InsertBefore(*parent, *child, *reference));
        Ok(())
    }

    fn remove_child(&mut self, parent: &NodeRef, child: &NodeRef) -> Result<(), HostError> {
        self.check(*parent)?;
        if self.nodes[*child].parent != Some(*parent) {
            return Err(HostError::MissingNode(format!("#{child} in #{parent}")));
        }
        self.detach(*child);
        self.ops.push(Op::Remove(*parent, *child));
        Ok(())
    }

    fn add_event_listener(
        &mut self,
        node: &NodeRef,
        event: &str,
        handler: &EventHandler,
    ) -> Result<(), HostError> {
        self.check(*node)?;
        self.nodes[*node].listeners.push((event.to_owned(), handler.clone()));
        self.ops.push(Op::Listen(*node, event.to_owned()));
        Ok(())
    }

    fn remove_event_listener(
        &mut self,
        node: &NodeRef,
        event: &str,
        handler: &EventHandler,
    ) -> Result<(), HostError> {
        self.check(*node)?;
        self.nodes[*node]
            .listeners
            .retain(|(name, h)| !(name == event && std::rc::Rc::ptr_eq(h, handler)));
        self.ops.push(Op::Unlisten(*node, event.to_owned()));
        Ok(())
    }
}
