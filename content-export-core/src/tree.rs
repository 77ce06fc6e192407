//! # tree: in-memory content library
//!
//! A [`ContentTree`] is an arena of [`ContentNode`]s rooted at a single
//! [`NodeType::Library`] node. Nodes refer to each other by [`NodeId`]; every
//! node except the root keeps a back-link to its parent so that
//! [`ContentTree::promote_to_root`] can splice it out without scanning the
//! whole tree.
//!
//! ## Mutation
//! - [`ContentTree::filter`] only looks at the root's immediate children.
//!   Rejected children are detached together with their subtrees; the arena
//!   slots stay allocated but are no longer reachable.
//! - [`ContentTree::promote_to_root`] moves a node (never copies it) to the end
//!   of the root's children.
//!
//! ## Traversal
//! [`ContentTree::nodes`] and [`ContentTree::traverse`] visit nodes in
//! post-order. A hidden node is skipped together with its subtree unless
//! [`TraverseOptions::include_hidden`] is set.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::error::ParseError;
use crate::markup::{self, Element, XmlNode};

/// Namespace of the platform's library import/export schema.
pub const LIBRARY_NAMESPACE: &str = "http://www.demandware.com/xml/impex/library/2006-10-31";

/// Index of a node inside its [`ContentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    /// Virtual root of the tree.
    Library,
    Page,
    /// Shared content asset.
    Content,
    /// Reusable, nestable building block.
    Component,
    /// Reference to a binary asset. Always a leaf.
    Static,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Library => "LIBRARY",
            NodeType::Page => "PAGE",
            NodeType::Content => "CONTENT",
            NodeType::Component => "COMPONENT",
            NodeType::Static => "STATIC",
        }
    }

    /// Whether nodes of this type are written as `<content>` elements.
    pub fn is_content_element(&self) -> bool {
        matches!(self, NodeType::Page | NodeType::Content | NodeType::Component)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ContentNode {
    handle: NodeId,
    pub id: String,
    pub node_type: NodeType,
    /// Page type or component type, without the `page.`/`component.` prefix.
    pub type_id: Option<String>,
    pub hidden: bool,
    /// Original markup of the node. `None` for static assets.
    pub raw: Option<Element>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl ContentNode {
    /// A detached node; attach it with [`ContentTree::add_node`].
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            handle: NodeId(usize::MAX),
            id: id.into(),
            node_type,
            type_id: None,
            hidden: false,
            raw: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_type_id(mut self, type_id: impl Into<String>) -> Self {
        self.type_id = Some(type_id.into());
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_raw(mut self, raw: Element) -> Self {
        self.raw = Some(raw);
        self
    }

    /// This node's key in its tree.
    pub fn handle(&self) -> NodeId {
        self.handle
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn child_ids(&self) -> &[NodeId] {
        &self.children
    }

    /// Folder ids from `<folder-links><classification-link folder-id="…"/>`.
    pub fn classification_folders(&self) -> Vec<&str> {
        let Some(raw) = &self.raw else {
            return Vec::new();
        };
        raw.children_named("folder-links")
            .flat_map(|links| links.children_named("classification-link"))
            .filter_map(|link| link.attr("folder-id"))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraverseOptions {
    pub include_hidden: bool,
}

impl TraverseOptions {
    pub fn visible() -> Self {
        Self {
            include_hidden: false,
        }
    }

    pub fn all() -> Self {
        Self {
            include_hidden: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentTree {
    nodes: Vec<ContentNode>,
    root: NodeId,
}

impl ContentTree {
    /// An empty tree whose root carries `library_id`.
    pub fn new(library_id: impl Into<String>) -> Self {
        Self::with_root(ContentNode::new(library_id, NodeType::Library))
    }

    pub(crate) fn with_root(mut root: ContentNode) -> Self {
        root.node_type = NodeType::Library;
        root.handle = NodeId(0);
        root.parent = None;
        root.children.clear();
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Append `node` as the last child of `parent` and return its id.
    ///
    /// Panics if `parent` does not belong to this tree, if `parent` is a
    /// static asset, or if `node` is a library node.
    pub fn add_node(&mut self, parent: NodeId, mut node: ContentNode) -> NodeId {
        assert!(parent.0 < self.nodes.len(), "parent {parent:?} is not part of this tree");
        assert!(
            self.nodes[parent.0].node_type != NodeType::Static,
            "static asset '{}' cannot have children",
            self.nodes[parent.0].id
        );
        assert!(node.node_type != NodeType::Library, "a tree has exactly one library node");

        let handle = NodeId(self.nodes.len());
        node.handle = handle;
        node.parent = Some(parent);
        node.children.clear();
        self.nodes.push(node);
        self.nodes[parent.0].children.push(handle);
        handle
    }

    pub fn root(&self) -> &ContentNode {
        &self.nodes[self.root.0]
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Panics if `id` was not issued by this tree.
    pub fn node(&self, id: NodeId) -> &ContentNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&ContentNode> {
        self.nodes.get(id.0)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &ContentNode> {
        self.nodes[id.0].children.iter().map(|c| &self.nodes[c.0])
    }

    /// Number of nodes reachable from the root, hidden ones and the root included.
    pub fn len(&self) -> usize {
        self.nodes(TraverseOptions::all()).count()
    }

    /// True when the root has no children.
    pub fn is_empty(&self) -> bool {
        self.root().children.is_empty()
    }

    /// First node, in traversal order, matching `predicate`. Hidden nodes included.
    pub fn find<P>(&self, mut predicate: P) -> Option<&ContentNode>
    where
        P: FnMut(&ContentNode) -> bool,
    {
        self.nodes(TraverseOptions::all()).find(|n| predicate(n))
    }

    /// Whether `id` is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes.get(current.0).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Distance from the root (root is 0). `None` for detached nodes.
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        if !self.is_attached(id) {
            return None;
        }
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            depth += 1;
            current = parent;
        }
        Some(depth)
    }

    /// Fresh post-order iterator. Each call starts from scratch.
    pub fn nodes(&self, options: TraverseOptions) -> Nodes<'_> {
        Nodes {
            tree: self,
            include_hidden: options.include_hidden,
            stack: vec![(self.root, 0)],
        }
    }

    /// Calls `visit` for every node [`nodes`](Self::nodes) would yield.
    pub fn traverse<F>(&self, mut visit: F, options: TraverseOptions) -> &Self
    where
        F: FnMut(&ContentNode),
    {
        for node in self.nodes(options) {
            visit(node);
        }
        self
    }

    /// Keep only the root children for which `predicate` holds.
    ///
    /// Deeper levels are never inspected; a kept child keeps its whole subtree.
    pub fn filter<P>(&mut self, mut predicate: P) -> &mut Self
    where
        P: FnMut(&ContentNode) -> bool,
    {
        let root = self.root;
        let children = std::mem::take(&mut self.nodes[root.0].children);
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            if predicate(&self.nodes[child.0]) {
                kept.push(child);
            } else {
                self.nodes[child.0].parent = None;
            }
        }
        self.nodes[root.0].children = kept;
        self
    }

    /// Move `id` (with its subtree) to the end of the root's children.
    ///
    /// Panics if `id` is the root or is not attached to this tree.
    pub fn promote_to_root(&mut self, id: NodeId) -> &mut Self {
        assert!(id != self.root, "the library root cannot be promoted");
        assert!(self.is_attached(id), "node {id:?} is not attached to this tree");

        let root = self.root;
        let Some(parent) = self.nodes[id.0].parent else {
            return self;
        };
        if parent == root {
            return self;
        }
        self.nodes[parent.0].children.retain(|c| *c != id);
        self.nodes[id.0].parent = Some(root);
        self.nodes[root.0].children.push(id);
        self
    }

    /// Serialize back to library markup.
    ///
    /// Non-content children of the `<library>` element (folders, header) are
    /// written first, then one `<content>` element per page, content and
    /// component in traversal order. `<content-link>`s to nodes that are not
    /// written are dropped from the output.
    pub fn to_markup_string(&self, options: TraverseOptions) -> Result<String, ParseError> {
        let root = self.root();
        let mut library = match &root.raw {
            Some(raw) => raw.clone(),
            None => Element::new("library")
                .with_attribute("xmlns", LIBRARY_NAMESPACE)
                .with_attribute("library-id", root.id.clone()),
        };
        library.retain_elements(|e| e.local_name() != "content");

        let emitted: Vec<&ContentNode> = self
            .nodes(options)
            .filter(|n| n.node_type.is_content_element())
            .collect();
        let emitted_ids: HashSet<&str> = emitted.iter().map(|n| n.id.as_str()).collect();

        for node in emitted {
            let mut element = match &node.raw {
                Some(raw) => raw.clone(),
                None => synthesize_content_element(node),
            };
            prune_content_links(&mut element, &emitted_ids);
            library.children.push(XmlNode::Element(element));
        }

        markup::to_document_string(&library)
    }
}

fn synthesize_content_element(node: &ContentNode) -> Element {
    let mut element = Element::new("content").with_attribute("content-id", node.id.clone());
    let prefix = match node.node_type {
        NodeType::Page => Some("page"),
        NodeType::Component => Some("component"),
        _ => None,
    };
    if let (Some(prefix), Some(type_id)) = (prefix, &node.type_id) {
        element = element.with_child(Element::new("type").with_text(format!("{prefix}.{type_id}")));
    }
    if node.hidden {
        element = element.with_child(Element::new("online-flag").with_text("false"));
    }
    element
}

fn prune_content_links(element: &mut Element, emitted: &HashSet<&str>) {
    for links in element
        .elements_mut()
        .filter(|e| e.local_name() == "content-links")
    {
        links.retain_elements(|link| {
            link.local_name() != "content-link"
                || link
                    .attr("content-id")
                    .is_some_and(|id| emitted.contains(id))
        });
    }
    element.retain_elements(|e| e.local_name() != "content-links" || e.elements().next().is_some());
}

/// Post-order iterator over a [`ContentTree`] with its own explicit stack.
pub struct Nodes<'a> {
    tree: &'a ContentTree,
    include_hidden: bool,
    /// (node, index of the next child to descend into)
    stack: Vec<(NodeId, usize)>,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = &'a ContentNode;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (id, next_child) = *self.stack.last()?;
            let node = &self.tree.nodes[id.0];
            if next_child < node.children.len() {
                if let Some(top) = self.stack.last_mut() {
                    top.1 += 1;
                }
                let child = node.children[next_child];
                if self.include_hidden || !self.tree.nodes[child.0].hidden {
                    self.stack.push((child, 0));
                }
            } else {
                self.stack.pop();
                return Some(node);
            }
        }
    }
}
