//! Node selection: decide which pages/content survive and which components are
//! promoted to the top level.

use std::collections::HashSet;

use regex::Regex;
use tracing::{debug, info};

use crate::error::SelectionError;
use crate::tree::{ContentNode, ContentTree, NodeId, NodeType, TraverseOptions};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOptions {
    /// Treat identifiers as regular expressions instead of literal ids.
    pub use_pattern: bool,
    /// When non-empty, pages/content must be classified into one of these folders.
    pub folders: Vec<String>,
}

/// Matches a node id against one caller-supplied identifier.
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn exact(id: impl Into<String>) -> Self {
        Matcher::Exact(id.into())
    }

    pub fn pattern(source: &str) -> Result<Self, SelectionError> {
        Regex::new(source)
            .map(Matcher::Pattern)
            .map_err(|source_err| SelectionError::InvalidPattern {
                pattern: source.to_string(),
                source: source_err,
            })
    }

    pub fn matches(&self, id: &str) -> bool {
        match self {
            Matcher::Exact(expected) => expected == id,
            Matcher::Pattern(re) => re.is_match(id),
        }
    }
}

/// Compile every identifier up front so an invalid pattern fails before the tree is touched.
pub fn build_matchers(identifiers: &[String], use_pattern: bool) -> Result<Vec<Matcher>, SelectionError> {
    identifiers
        .iter()
        .map(|id| {
            if use_pattern {
                Matcher::pattern(id)
            } else {
                Ok(Matcher::exact(id.clone()))
            }
        })
        .collect()
}

fn any_match(matchers: &[Matcher], id: &str) -> bool {
    matchers.iter().any(|m| m.matches(id))
}

fn in_folders(node: &ContentNode, folders: &[String]) -> bool {
    folders.is_empty()
        || node
            .classification_folders()
            .iter()
            .any(|f| folders.iter().any(|wanted| wanted == f))
}

/// Filter the root's pages/content down to the requested ones and promote
/// every matching component found anywhere in the tree (hidden included).
///
/// Matching components are collected from the unfiltered tree, so a component
/// nested in a page that was not requested is still exported. They are
/// promoted before the root-level filter runs and the filter leaves them in
/// place.
pub fn select_and_promote(
    tree: &mut ContentTree,
    identifiers: &[String],
    options: &SelectOptions,
) -> Result<(), SelectionError> {
    let matchers = build_matchers(identifiers, options.use_pattern)?;

    let promotions: Vec<NodeId> = tree
        .nodes(TraverseOptions::all())
        .filter(|n| n.node_type == NodeType::Component && any_match(&matchers, &n.id))
        .map(|n| n.handle())
        .collect();

    for id in &promotions {
        debug!(content_id = %tree.node(*id).id, "[SELECT] Promoting component to root");
        tree.promote_to_root(*id);
    }

    let promoted: HashSet<NodeId> = promotions.iter().copied().collect();
    tree.filter(|node| {
        if promoted.contains(&node.handle()) {
            return true;
        }
        let keep = matches!(node.node_type, NodeType::Page | NodeType::Content)
            && any_match(&matchers, &node.id)
            && in_folders(node, &options.folders);
        debug!(content_id = %node.id, node_type = %node.node_type, keep, "[SELECT] Root-level filter");
        keep
    });

    info!(
        identifiers = identifiers.len(),
        use_pattern = options.use_pattern,
        folders = options.folders.len(),
        kept = tree.root().child_ids().len(),
        promoted = promotions.len(),
        "[SELECT] Selection complete"
    );
    Ok(())
}
