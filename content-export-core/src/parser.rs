//! Builds a [`ContentTree`] from library markup.
//!
//! Every `<content>` element becomes a node. Pages and shared content are
//! placed under the root; components hang under the first node that links them
//! via `<content-links>`, discovered depth-first from the top-level nodes in
//! document order. Static assets are found by walking the JSON held in each
//! node's `<data>` elements along the configured dotted lookup paths.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ParseError;
use crate::markup::{self, Element, XmlNode};
use crate::tree::{ContentNode, ContentTree, NodeId, NodeType};

/// Asset lookup paths used when none are configured.
pub const DEFAULT_ASSET_QUERY: &[&str] = &["image.path"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Dotted paths into a node's `<data>` JSON that hold asset paths.
    pub asset_query: Vec<String>,
    /// Keep components nothing links to, as direct children of the root.
    pub keep_orphans: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            asset_query: DEFAULT_ASSET_QUERY.iter().map(|s| s.to_string()).collect(),
            keep_orphans: false,
        }
    }
}

impl ContentTree {
    /// Parse library markup into a tree. See the module docs for placement rules.
    pub fn parse(markup: &str, options: &ParseOptions) -> Result<Self, ParseError> {
        parse_library(markup, options)
    }
}

struct ContentRecord {
    id: String,
    node_type: NodeType,
    type_id: Option<String>,
    hidden: bool,
    links: Vec<String>,
    assets: Vec<String>,
    raw: Option<Element>,
}

pub fn parse_library(markup: &str, options: &ParseOptions) -> Result<ContentTree, ParseError> {
    let mut document = markup::parse_document(markup)?;
    if document.local_name() != "library" {
        return Err(ParseError::UnexpectedRoot {
            found: document.name,
        });
    }

    let library_id = document.attr("library-id").unwrap_or_default().to_string();
    let queries: Vec<Vec<&str>> = options
        .asset_query
        .iter()
        .map(|q| q.split('.').filter(|s| !s.is_empty()).collect())
        .filter(|segments: &Vec<&str>| !segments.is_empty())
        .collect();

    let mut records: Vec<ContentRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut header = Vec::new();
    for child in std::mem::take(&mut document.children) {
        match child {
            XmlNode::Element(e) if e.local_name() == "content" => {
                let record = read_record(e, &queries)?;
                if index.contains_key(&record.id) {
                    warn!(content_id = %record.id, "Duplicate content id in library, keeping first");
                    continue;
                }
                index.insert(record.id.clone(), records.len());
                records.push(record);
            }
            other => header.push(other),
        }
    }
    document.children = header;

    let root = ContentNode::new(library_id.clone(), NodeType::Library).with_raw(document);
    let mut builder = TreeBuilder {
        tree: ContentTree::with_root(root),
        placed: vec![false; records.len()],
        records,
        index,
    };

    let root_id = builder.tree.root_id();
    for i in 0..builder.records.len() {
        if matches!(builder.records[i].node_type, NodeType::Page | NodeType::Content) {
            builder.place(i, root_id);
        }
    }

    let mut orphans = 0usize;
    for i in 0..builder.records.len() {
        if builder.placed[i] || builder.records[i].node_type != NodeType::Component {
            continue;
        }
        if options.keep_orphans {
            debug!(content_id = %builder.records[i].id, "Keeping orphan component at root");
            builder.place(i, root_id);
        } else {
            debug!(content_id = %builder.records[i].id, "Dropping orphan component");
            orphans += 1;
        }
    }

    let tree = builder.tree;
    info!(
        library_id = %library_id,
        content_elements = builder.placed.len(),
        dropped_orphans = orphans,
        "[PARSE] Parsed content library"
    );
    Ok(tree)
}

fn read_record(element: Element, queries: &[Vec<&str>]) -> Result<ContentRecord, ParseError> {
    let id = element
        .attr("content-id")
        .ok_or_else(|| ParseError::MissingAttribute {
            element: element.name.clone(),
            attribute: "content-id".into(),
        })?
        .to_string();

    let (node_type, type_id) = match element.child_text("type") {
        Some(t) if t.starts_with("page.") => (NodeType::Page, Some(t["page.".len()..].to_string())),
        Some(t) if t.starts_with("component.") => {
            (NodeType::Component, Some(t["component.".len()..].to_string()))
        }
        Some(t) if !t.is_empty() => (NodeType::Content, Some(t)),
        _ => (NodeType::Content, None),
    };

    let hidden = element
        .child_text("online-flag")
        .is_some_and(|flag| flag.eq_ignore_ascii_case("false"));

    let links = element
        .children_named("content-links")
        .flat_map(|l| l.children_named("content-link"))
        .filter_map(|l| l.attr("content-id"))
        .map(str::to_string)
        .collect();

    let mut assets = Vec::new();
    let mut seen = HashSet::new();
    for data in element.children_named("data") {
        let payload = data.text();
        if payload.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(&payload) {
            Ok(v) => v,
            Err(e) => {
                debug!(content_id = %id, error = %e, "Skipping <data> that is not JSON");
                continue;
            }
        };
        for query in queries {
            let mut found = Vec::new();
            collect_lookup(&value, query, &mut found);
            for raw_path in found {
                let asset = normalize_asset_path(&raw_path);
                if !asset.is_empty() && seen.insert(asset.clone()) {
                    assets.push(asset);
                }
            }
        }
    }

    Ok(ContentRecord {
        id,
        node_type,
        type_id,
        hidden,
        links,
        assets,
        raw: Some(element),
    })
}

/// Walk `path` through `value`, fanning out over arrays, collecting strings.
fn collect_lookup(value: &Value, path: &[&str], out: &mut Vec<String>) {
    if let Value::Array(items) = value {
        for item in items {
            collect_lookup(item, path, out);
        }
        return;
    }
    match path.split_first() {
        None => {
            if let Value::String(s) = value {
                out.push(s.clone());
            }
        }
        Some((head, rest)) => {
            if let Some(next) = value.get(*head) {
                collect_lookup(next, rest, out);
            }
        }
    }
}

fn normalize_asset_path(path: &str) -> String {
    path.trim().trim_start_matches('/').to_string()
}

struct TreeBuilder {
    tree: ContentTree,
    records: Vec<ContentRecord>,
    index: HashMap<String, usize>,
    placed: Vec<bool>,
}

impl TreeBuilder {
    /// Attach record `start` under `parent`, then its linked components depth-first.
    fn place(&mut self, start: usize, parent: NodeId) {
        let mut work = vec![(start, parent)];
        while let Some((i, parent)) = work.pop() {
            if self.placed[i] {
                continue;
            }
            self.placed[i] = true;

            let record = &mut self.records[i];
            let mut node = ContentNode::new(record.id.clone(), record.node_type).with_hidden(record.hidden);
            node.type_id = record.type_id.clone();
            node.raw = record.raw.take();
            let assets = record.assets.clone();
            let links = record.links.clone();
            let node_id = self.tree.add_node(parent, node);

            for asset in assets {
                self.tree
                    .add_node(node_id, ContentNode::new(asset, NodeType::Static));
            }

            let mut targets = Vec::new();
            for link in &links {
                match self.index.get(link) {
                    None => {
                        debug!(from = %self.records[i].id, to = %link, "Ignoring link to unknown content");
                    }
                    Some(&j) if j == i || self.placed[j] => {
                        debug!(from = %self.records[i].id, to = %link, "Ignoring link to already placed content");
                    }
                    Some(&j) if self.records[j].node_type != NodeType::Component => {
                        debug!(from = %self.records[i].id, to = %link, "Ignoring link to top-level content");
                    }
                    Some(&j) => targets.push(j),
                }
            }
            for j in targets.into_iter().rev() {
                work.push((j, node_id));
            }
        }
    }
}
