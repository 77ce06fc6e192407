//! Human-readable rendering for CLI output.

use std::fmt::Write;

use content_export_core::{ContentTree, ExportResult};

/// Indented pre-order outline of the visible tree, one `TYPE id [typeId]` per line.
pub fn render_outline(tree: &ContentTree) -> String {
    let mut out = String::new();
    let mut stack = vec![(tree.root_id(), 0usize)];

    while let Some((id, depth)) = stack.pop() {
        let node = tree.node(id);
        let _ = write!(out, "{}{} {}", "  ".repeat(depth), node.node_type, node.id);
        if let Some(type_id) = &node.type_id {
            let _ = write!(out, " [{type_id}]");
        }
        out.push('\n');

        let visible: Vec<_> = tree
            .children(id)
            .filter(|child| !child.hidden)
            .map(|child| child.handle())
            .collect();
        for child in visible.into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    out
}

pub fn format_summary(result: &ExportResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Exported {} page(s), {} content asset(s), {} component(s)",
        result.page_count, result.content_count, result.component_count
    );
    let _ = writeln!(out, "Assets downloaded: {}", result.downloaded_assets.len());
    if !result.failed_assets.is_empty() {
        let _ = writeln!(out, "Assets failed: {}", result.failed_assets.len());
        for failed in &result.failed_assets {
            let _ = writeln!(out, "  {}: {}", failed.id, failed.error);
        }
    }
    let _ = writeln!(out, "Library written to {}", result.markup_path.display());
    out
}
