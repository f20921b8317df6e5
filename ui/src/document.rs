use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use html5ever::serialize::TraversalScope;
use thiserror::Error;
use util::IdGenerator;

use crate::markup::{self, MarkupError};

/// Handle to a node owned by a [`Document`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("index {index} is out of bounds for {parent} with {len} children")]
    IndexOutOfBounds { parent: NodeId, index: usize, len: usize },

    #[error("node {0} is already attached")]
    AlreadyAttached(NodeId),
}

/// Element tag plus ordered attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(attr, _)| attr == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let position = self.attributes.iter().position(|(attr, _)| attr == name)?;
        Some(self.attributes.remove(position).1)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }

    /// Adds or removes a class token, keeping the other tokens in order.
    pub fn toggle_class(&mut self, class: &str, present: bool) {
        let mut classes: Vec<String> = self
            .attribute("class")
            .map(|classes| {
                classes
                    .split_ascii_whitespace()
                    .filter(|c| *c != class)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if present {
            classes.push(class.to_string());
        }
        if classes.is_empty() {
            self.remove_attribute("class");
        } else {
            self.set_attribute("class", classes.join(" "));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Position between two children of a parent node.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InsertionPoint {
    pub parent: NodeId,
    pub index: usize,
}

impl InsertionPoint {
    pub fn new(parent: NodeId, index: usize) -> Self {
        Self { parent, index }
    }
}

/// Parsed nodes that are owned by a document but not yet attached.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a fragment must be inserted or discarded"]
pub struct Fragment {
    roots: Vec<NodeId>,
}

impl Fragment {
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }
}

/// Structured-document editing primitives used to splice cached markup.
pub trait DocumentEditor {
    /// Removes the children of `parent` in `range`. Returns how many nodes
    /// were removed.
    fn remove_range(&mut self, parent: NodeId, range: Range<usize>) -> Result<usize, DocumentError>;

    /// Parses markup into a detached fragment.
    fn parse_fragment(&mut self, markup: &str) -> Result<Fragment, MarkupError>;

    /// Attaches every root of `fragment` at `point`, in order. Returns the
    /// inserted roots.
    fn insert_at(
        &mut self,
        point: InsertionPoint,
        fragment: Fragment,
    ) -> Result<Vec<NodeId>, DocumentError>;

    /// Drops a fragment that will not be inserted.
    fn discard(&mut self, fragment: Fragment);
}

/// Arena-backed ordered tree of elements and text.
#[derive(Debug)]
pub struct Document {
    nodes: HashMap<NodeId, Node>,
    ids: IdGenerator,
    root: NodeId,
}

impl Document {
    /// Creates a document with a single root element.
    pub fn new(root_tag: &str) -> Self {
        let mut document = Self {
            nodes: HashMap::new(),
            ids: IdGenerator::default(),
            root: NodeId(0),
        };
        document.root = document.create_element(root_tag);
        document
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.insert_node(NodeKind::Element(Element::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.insert_node(NodeKind::Text(text.to_string()))
    }

    fn insert_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.ids.next());
        self.nodes.insert(
            id,
            Node {
                kind,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&id).map(|node| &node.kind)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.kind(id)? {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Result<&mut Element, DocumentError> {
        match self.nodes.get_mut(&id).map(|node| &mut node.kind) {
            Some(NodeKind::Element(element)) => Ok(element),
            Some(NodeKind::Text(_)) => Err(DocumentError::NotAnElement(id)),
            None => Err(DocumentError::UnknownNode(id)),
        }
    }

    fn ensure_element(&self, id: NodeId) -> Result<(), DocumentError> {
        match self.kind(id) {
            Some(NodeKind::Element(_)) => Ok(()),
            Some(NodeKind::Text(_)) => Err(DocumentError::NotAnElement(id)),
            None => Err(DocumentError::UnknownNode(id)),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Children of `id` that are elements, skipping text.
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.element(*child).is_some())
            .collect()
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    /// Concatenated text of a node and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        self.collect_text(id, &mut text);
        text
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(NodeKind::Element(_)) => {
                for child in self.children(id) {
                    self.collect_text(*child, out);
                }
            }
            None => {}
        }
    }

    /// Replaces all children of an element with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<(), DocumentError> {
        self.ensure_element(id)?;
        let len = self.children(id).len();
        self.remove_range(id, 0..len)?;
        if !text.is_empty() {
            let text = self.create_text(text);
            self.append_child(id, text)?;
        }
        Ok(())
    }

    /// Depth-first search for the attached element whose `id` attribute
    /// equals `dom_id`.
    pub fn find_by_id(&self, dom_id: &str) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if self
                .element(node)
                .is_some_and(|element| element.attribute("id") == Some(dom_id))
            {
                return Some(node);
            }
            stack.extend(self.children(node).iter().rev().copied());
        }
        None
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DocumentError> {
        let len = self.children(parent).len();
        self.insert_child(parent, len, child)
    }

    pub fn insert_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), DocumentError> {
        self.ensure_element(parent)?;
        let Some(node) = self.nodes.get(&child) else {
            return Err(DocumentError::UnknownNode(child));
        };
        if node.parent.is_some() || child == self.root {
            return Err(DocumentError::AlreadyAttached(child));
        }
        let siblings = &self.nodes[&parent].children;
        if index > siblings.len() {
            return Err(DocumentError::IndexOutOfBounds {
                parent,
                index,
                len: siblings.len(),
            });
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.insert(index, child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        Ok(())
    }

    /// Detaches a node from its parent and drops it with its subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DocumentError> {
        if !self.contains(id) {
            return Err(DocumentError::UnknownNode(id));
        }
        if let Some(parent) = self.parent(id) {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children.retain(|child| *child != id);
            }
        }
        self.drop_subtree(id);
        Ok(())
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(node) = self.nodes.remove(&node) {
                stack.extend(node.children);
            }
        }
    }

    /// Replaces a fragment that consists of one wrapping element with that
    /// element's children. Whitespace-only text roots around the wrapper are
    /// ignored. Any other fragment is returned unchanged.
    pub fn strip_outer_element(&mut self, fragment: Fragment) -> Fragment {
        let significant: Vec<NodeId> = fragment
            .roots
            .iter()
            .copied()
            .filter(|root| !self.is_blank_text(*root))
            .collect();
        let [wrapper] = significant.as_slice() else {
            return fragment;
        };
        let wrapper = *wrapper;
        if self.element(wrapper).is_none() {
            return fragment;
        }

        let children = self
            .nodes
            .get_mut(&wrapper)
            .map(|node| std::mem::take(&mut node.children))
            .unwrap_or_default();
        for child in &children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = None;
            }
        }
        for root in fragment.roots {
            self.drop_subtree(root);
        }
        Fragment { roots: children }
    }

    fn is_blank_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Text(text)) if text.trim().is_empty())
    }

    /// Serializes a node including its own tag.
    pub fn outer_markup(&self, id: NodeId) -> String {
        markup::write_node(self, id, TraversalScope::IncludeNode)
    }

    /// Serializes the children of a node.
    pub fn inner_markup(&self, id: NodeId) -> String {
        markup::write_node(self, id, TraversalScope::ChildrenOnly(None))
    }

    /// Number of live nodes in the arena, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl DocumentEditor for Document {
    fn remove_range(
        &mut self,
        parent: NodeId,
        range: Range<usize>,
    ) -> Result<usize, DocumentError> {
        let Some(node) = self.nodes.get(&parent) else {
            return Err(DocumentError::UnknownNode(parent));
        };
        let len = node.children.len();
        if range.start > range.end || range.end > len {
            return Err(DocumentError::IndexOutOfBounds {
                parent,
                index: range.end.max(range.start),
                len,
            });
        }
        let removed: Vec<NodeId> = self
            .nodes
            .get_mut(&parent)
            .map(|node| node.children.drain(range).collect())
            .unwrap_or_default();
        for child in &removed {
            self.drop_subtree(*child);
        }
        Ok(removed.len())
    }

    fn parse_fragment(&mut self, markup: &str) -> Result<Fragment, MarkupError> {
        let roots = markup::parse_into(self, markup)?;
        Ok(Fragment { roots })
    }

    fn insert_at(
        &mut self,
        point: InsertionPoint,
        fragment: Fragment,
    ) -> Result<Vec<NodeId>, DocumentError> {
        if let Err(err) = self.ensure_element(point.parent) {
            self.discard(fragment);
            return Err(err);
        }
        let len = self.children(point.parent).len();
        if point.index > len {
            self.discard(fragment);
            return Err(DocumentError::IndexOutOfBounds {
                parent: point.parent,
                index: point.index,
                len,
            });
        }
        for (offset, root) in fragment.roots.iter().enumerate() {
            self.insert_child(point.parent, point.index + offset, *root)?;
        }
        Ok(fragment.roots)
    }

    fn discard(&mut self, fragment: Fragment) {
        for root in fragment.roots {
            if self.parent(root).is_none() {
                self.drop_subtree(root);
            }
        }
    }
}
