//! In-process document tree.
//!
//! An arena of elements addressed by [`NodeId`]. Removed nodes are detached,
//! not freed, so ids stay valid for the lifetime of the document. Every
//! insertion is recorded as a [`MutationRecord`] for the page's observers.

mod fixture;
mod render;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use fixture::{ElementFixture, PageFixture};
pub use render::render_html;

/// Handle to an element inside one [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One batch of inserted nodes, as seen by a mutation observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
    classes: Vec<String>,
    style: BTreeMap<String, String>,
    text: Option<String>,
    size: Option<(u32, u32)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            classes: Vec::new(),
            style: BTreeMap::new(),
            text: None,
            size: None,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Element tree with a `html > head, body` skeleton.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Element>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    pending_mutations: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        let mut document = Self {
            nodes: vec![Element::new("html")],
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            pending_mutations: Vec::new(),
        };
        document.head = document.create_element("head");
        document.body = document.create_element("body");
        document.attach(document.root, document.head, None);
        document.attach(document.root, document.body, None);
        document
    }

    pub const fn root(&self) -> NodeId {
        self.root
    }

    pub const fn head(&self) -> NodeId {
        self.head
    }

    pub const fn body(&self) -> NodeId {
        self.body
    }

    fn get(&self, node: NodeId) -> Option<&Element> {
        self.nodes.get(node.0)
    }

    fn get_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        self.nodes.get_mut(node.0)
    }

    // ----- construction ---------------------------------------------------

    /// Create a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.nodes.push(Element::new(tag));
        NodeId(self.nodes.len() - 1)
    }

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Append several children as one mutation batch
    pub fn append_children(&mut self, parent: NodeId, children: &[NodeId]) {
        let mut added = Vec::with_capacity(children.len());
        for &child in children {
            if self.attach(parent, child, None) {
                added.push(child);
            }
        }
        self.record_insertion(parent, added);
    }

    /// Insert `child` before `reference`, or at the end when `reference` is
    /// `None` or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if self.attach(parent, child, reference) {
            self.record_insertion(parent, vec![child]);
        }
    }

    /// Insert `child` directly after `node` in its parent
    pub fn insert_after(&mut self, node: NodeId, child: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        let reference = self.next_sibling(node);
        self.insert_before(parent, child, reference);
    }

    /// Insert `child` as the first child of `parent`
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        let first = self.children(parent).first().copied();
        self.insert_before(parent, child, first);
    }

    /// Detach `node` (and its subtree) from its parent
    pub fn remove(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(element) = self.get_mut(parent) {
            element.children.retain(|child| *child != node);
        }
        if let Some(element) = self.get_mut(node) {
            element.parent = None;
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> bool {
        if parent == child
            || self.get(parent).is_none()
            || self.get(child).is_none()
            || self.contains(child, parent)
        {
            return false;
        }
        self.remove(child);

        let Some(element) = self.get_mut(parent) else {
            return false;
        };
        let position = reference
            .and_then(|reference| element.children.iter().position(|c| *c == reference))
            .unwrap_or(element.children.len());
        element.children.insert(position, child);
        if let Some(element) = self.get_mut(child) {
            element.parent = Some(parent);
        }
        true
    }

    fn record_insertion(&mut self, target: NodeId, added: Vec<NodeId>) {
        if !added.is_empty() && self.is_connected(target) {
            self.pending_mutations.push(MutationRecord { target, added });
        }
    }

    /// Drain the mutation records collected since the last call
    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.pending_mutations)
    }

    // ----- tree navigation ------------------------------------------------

    pub fn tag(&self, node: NodeId) -> &str {
        self.get(node).map_or("", |element| element.tag.as_str())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.get(node).and_then(|element| element.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.get(node).map_or(&[], |element| element.children.as_slice())
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|sibling| *sibling == node)?;
        siblings.get(position + 1).copied()
    }

    /// Node and its ancestors, nearest first
    pub fn ancestors_inclusive(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = vec![node];
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Whether `node` is `ancestor` or lies inside it
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors_inclusive(node).contains(&ancestor)
    }

    /// Whether `node` is attached to the document root
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// Descendants of `node` in document order, `node` excluded
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            found.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        found
    }

    /// Connected elements matching `predicate`, in document order
    pub fn query_all(&self, predicate: impl Fn(&Self, NodeId) -> bool) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|node| predicate(self, *node))
            .collect()
    }

    /// Nearest inclusive ancestor matching `predicate`
    pub fn closest(
        &self,
        node: NodeId,
        predicate: impl Fn(&Self, NodeId) -> bool,
    ) -> Option<NodeId> {
        self.ancestors_inclusive(node)
            .into_iter()
            .find(|candidate| predicate(self, *candidate))
    }

    /// First child of `node` carrying `class`
    pub fn child_with_class(&self, node: NodeId, class: &str) -> Option<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .find(|child| self.has_class(*child, class))
    }

    // ----- attributes -----------------------------------------------------

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.get(node)
            .and_then(|element| element.attributes.get(name))
            .map(String::as_str)
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(element) = self.get_mut(node) {
            element
                .attributes
                .insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(element) = self.get_mut(node) {
            element.attributes.remove(name);
        }
    }

    /// All attributes in name order
    pub fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        self.get(node).map_or_else(Vec::new, |element| {
            element
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        })
    }

    /// Boolean `disabled` state of a form control
    pub fn is_disabled(&self, node: NodeId) -> bool {
        self.has_attribute(node, "disabled")
    }

    pub fn set_disabled(&mut self, node: NodeId, disabled: bool) {
        if disabled {
            self.set_attribute(node, "disabled", "");
        } else {
            self.remove_attribute(node, "disabled");
        }
    }

    // ----- classes --------------------------------------------------------

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.get(node)
            .is_some_and(|element| element.classes.iter().any(|c| c == class))
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) {
        if let Some(element) = self.get_mut(node) {
            if !element.classes.iter().any(|c| c == class) {
                element.classes.push(class.to_string());
            }
        }
    }

    pub fn remove_class(&mut self, node: NodeId, class: &str) {
        if let Some(element) = self.get_mut(node) {
            element.classes.retain(|c| c != class);
        }
    }

    pub fn classes(&self, node: NodeId) -> &[String] {
        self.get(node).map_or(&[], |element| element.classes.as_slice())
    }

    // ----- inline style, text, layout -------------------------------------

    pub fn style(&self, node: NodeId, property: &str) -> Option<&str> {
        self.get(node)
            .and_then(|element| element.style.get(property))
            .map(String::as_str)
    }

    pub fn set_style(&mut self, node: NodeId, property: &str, value: &str) {
        if let Some(element) = self.get_mut(node) {
            element
                .style
                .insert(property.to_string(), value.to_string());
        }
    }

    pub fn remove_style(&mut self, node: NodeId, property: &str) {
        if let Some(element) = self.get_mut(node) {
            element.style.remove(property);
        }
    }

    /// Inline style serialized as `a: b; c: d`
    pub fn style_text(&self, node: NodeId) -> String {
        self.get(node).map_or_else(String::new, |element| {
            element
                .style
                .iter()
                .map(|(property, value)| format!("{property}: {value}"))
                .collect::<Vec<_>>()
                .join("; ")
        })
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.get(node).and_then(|element| element.text.as_deref())
    }

    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) {
        if let Some(element) = self.get_mut(node) {
            element.text = Some(text.into());
        }
    }

    /// Rendered `(width, height)` when layout information is known
    pub fn size(&self, node: NodeId) -> Option<(u32, u32)> {
        self.get(node).and_then(|element| element.size)
    }

    pub fn set_size(&mut self, node: NodeId, width: u32, height: u32) {
        if let Some(element) = self.get_mut(node) {
            element.size = Some((width, height));
        }
    }

    /// Build a detached element with attributes and optional text
    pub fn build(&mut self, tag: &str, attributes: &[(&str, &str)], text: Option<&str>) -> NodeId {
        let node = self.create_element(tag);
        for (name, value) in attributes {
            if *name == "class" {
                for class in value.split_whitespace() {
                    self.add_class(node, class);
                }
            } else if *name == "style" {
                for declaration in value.split(';') {
                    if let Some((property, value)) = declaration.split_once(':') {
                        self.set_style(node, property.trim(), value.trim());
                    }
                }
            } else {
                self.set_attribute(node, name, value);
            }
        }
        if let Some(text) = text {
            self.set_text(node, text);
        }
        node
    }
}
