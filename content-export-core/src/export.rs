//! High-level pipeline: fetch → parse → select → count → transfer → write.
//!
//! This module sequences one content export run:
//!   - Obtains library markup, either from a local file or by running an
//!     archive export job and pulling `library.xml` out of the returned zip
//!   - Parses it into a [`ContentTree`] and applies the selection engine
//!   - Counts surviving pages, content and components
//!   - Downloads referenced static assets with bounded concurrency (unless offline)
//!   - Writes the rewritten markup next to the assets
//!
//! # Error Handling
//! Job, archive, parse, selection and markup-write failures abort the run and
//! are returned as [`ExportError`]. Individual asset failures are returned in
//! [`ExportResult::failed_assets`]; the markup is written regardless.
//!
//! # Navigation
//! - Entry points: [`export_content`], [`fetch_content_library`]
//! - Path layout: [`LibraryLayout`]

use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};
use zip::ZipArchive;

use crate::contract::{ArchiveJobs, AssetFetcher, WaitOptions};
use crate::error::{BoxError, ExportError};
use crate::parser::{ParseOptions, DEFAULT_ASSET_QUERY};
use crate::selection::{select_and_promote, SelectOptions};
use crate::transfer::{
    dedupe_preserving_order, transfer_assets, FailedAsset, ProgressFn, TransferOptions,
    TransferReport, DEFAULT_CONCURRENCY,
};
use crate::tree::{ContentTree, NodeType, TraverseOptions};

/// Where a library lives in an archive, on disk, and on the remote file store.
///
/// Shared libraries use `libraries/{id}/…`; site-private libraries use
/// `sites/{id}/library/…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryLayout {
    pub library_id: String,
    pub is_site_library: bool,
}

impl LibraryLayout {
    pub fn new(library_id: impl Into<String>, is_site_library: bool) -> Self {
        Self {
            library_id: library_id.into(),
            is_site_library,
        }
    }

    /// Library directory relative to the export root.
    pub fn library_dir(&self) -> PathBuf {
        if self.is_site_library {
            Path::new("sites").join(&self.library_id).join("library")
        } else {
            Path::new("libraries").join(&self.library_id)
        }
    }

    pub fn markup_path(&self) -> PathBuf {
        self.library_dir().join("library.xml")
    }

    /// Path suffix of the markup entry inside an export archive.
    pub fn archive_entry_suffix(&self) -> String {
        if self.is_site_library {
            format!("sites/{}/library/library.xml", self.library_id)
        } else {
            format!("libraries/{}/library.xml", self.library_id)
        }
    }

    /// Local path of an asset relative to the export root.
    ///
    /// Empty, `.` and `..` segments of the asset path are dropped so an asset
    /// can never be written outside the library's static directory.
    pub fn asset_path(&self, asset: &str) -> PathBuf {
        let mut path = self.library_dir().join("static").join("default");
        path.extend(normal_segments(asset));
        path
    }

    /// Path of an asset on the platform's file store, normalised the same way
    /// as [`asset_path`](Self::asset_path).
    pub fn remote_asset_path(&self, asset: &str) -> String {
        let segments: Vec<&str> = normal_segments(asset).collect();
        format!("Libraries/{}/default/{}", self.library_id, segments.join("/"))
    }

    /// Data units selecting this library for an archive export job.
    pub fn data_units(&self) -> serde_json::Value {
        let mut units = Map::new();
        if self.is_site_library {
            units.insert(self.library_id.clone(), json!({ "content": true }));
            json!({ "sites": units })
        } else {
            units.insert(self.library_id.clone(), Value::Bool(true));
            json!({ "libraries": units })
        }
    }
}

fn normal_segments(asset: &str) -> impl Iterator<Item = &str> {
    asset
        .split(['/', '\\'])
        .filter(|segment| matches!(Path::new(segment).components().next(), Some(Component::Normal(_))))
}

/// Options for [`export_content`] and [`fetch_content_library`].
#[derive(Clone)]
pub struct ExportOptions {
    /// The library is a site's private library rather than a shared one.
    pub is_site_library: bool,
    /// Read markup from this file instead of running an archive job.
    pub library_file: Option<PathBuf>,
    /// Skip the asset transfer stage.
    pub offline: bool,
    pub use_pattern: bool,
    pub folders: Vec<String>,
    pub asset_query: Vec<String>,
    pub keep_orphans: bool,
    pub concurrency: usize,
    pub wait: WaitOptions,
    pub on_asset_progress: Option<Arc<ProgressFn>>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            is_site_library: false,
            library_file: None,
            offline: false,
            use_pattern: false,
            folders: Vec::new(),
            asset_query: DEFAULT_ASSET_QUERY.iter().map(|s| s.to_string()).collect(),
            keep_orphans: false,
            concurrency: DEFAULT_CONCURRENCY,
            wait: WaitOptions::default(),
            on_asset_progress: None,
        }
    }
}

impl fmt::Debug for ExportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOptions")
            .field("is_site_library", &self.is_site_library)
            .field("library_file", &self.library_file)
            .field("offline", &self.offline)
            .field("use_pattern", &self.use_pattern)
            .field("folders", &self.folders)
            .field("asset_query", &self.asset_query)
            .field("keep_orphans", &self.keep_orphans)
            .field("concurrency", &self.concurrency)
            .field("wait", &self.wait)
            .field("on_asset_progress", &self.on_asset_progress.is_some())
            .finish()
    }
}

impl ExportOptions {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            asset_query: self.asset_query.clone(),
            keep_orphans: self.keep_orphans,
        }
    }

    pub fn select_options(&self) -> SelectOptions {
        SelectOptions {
            use_pattern: self.use_pattern,
            folders: self.folders.clone(),
        }
    }
}

/// Parsed library plus the raw archive when one was downloaded.
#[derive(Debug, Clone)]
pub struct FetchedLibrary {
    pub tree: ContentTree,
    pub archive: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeCounts {
    pub pages: usize,
    pub contents: usize,
    pub components: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub page_count: usize,
    pub content_count: usize,
    pub component_count: usize,
    pub downloaded_assets: Vec<String>,
    pub failed_assets: Vec<FailedAsset>,
    pub output_dir: PathBuf,
    pub markup_path: PathBuf,
    #[serde(skip)]
    pub tree: ContentTree,
}

/// Fetch and parse a content library without selecting, transferring or writing.
pub async fn fetch_content_library<J>(
    jobs: &J,
    library_id: &str,
    options: &ExportOptions,
) -> Result<FetchedLibrary, ExportError>
where
    J: ArchiveJobs + ?Sized,
{
    let layout = LibraryLayout::new(library_id, options.is_site_library);

    let (markup, archive) = match &options.library_file {
        Some(path) => {
            info!(library_id, path = %path.display(), "[EXPORT][FETCH] Reading library from local file");
            let markup = tokio::fs::read_to_string(path).await.map_err(|source| {
                error!(error = ?source, path = %path.display(), "[EXPORT][FETCH] Failed to read library file");
                ExportError::Io {
                    path: path.clone(),
                    source,
                }
            })?;
            (markup, None)
        }
        None => {
            let data_units = layout.data_units();
            info!(library_id, data_units = %data_units, "[EXPORT][FETCH] Running archive export job");
            let archive = jobs
                .run_export_job(&data_units, &options.wait)
                .await
                .map_err(|e| {
                    error!(error = %e, library_id, "[EXPORT][FETCH] Archive export job failed");
                    e
                })?;
            info!(bytes = archive.len(), "[EXPORT][FETCH] Archive downloaded");
            let markup = extract_markup(&archive, &layout.archive_entry_suffix())?;
            (markup, Some(archive))
        }
    };

    let tree = ContentTree::parse(&markup, &options.parse_options()).map_err(|e| {
        error!(error = %e, library_id, "[EXPORT][FETCH] Failed to parse library markup");
        e
    })?;
    Ok(FetchedLibrary { tree, archive })
}

/// Find the archive entry ending with `suffix` and return it as text.
pub fn extract_markup(archive: &[u8], suffix: &str) -> Result<String, ExportError> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(|e| {
        error!(error = %e, "[EXPORT][FETCH] Failed to open export archive");
        e
    })?;
    let nested_suffix = format!("/{suffix}");

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");
        if name == suffix || name.ends_with(&nested_suffix) {
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|source| ExportError::Io {
                    path: PathBuf::from(&name),
                    source,
                })?;
            info!(entry = %name, "[EXPORT][FETCH] Located library markup in archive");
            return Ok(content);
        }
    }

    error!(expected = %suffix, "[EXPORT][FETCH] Archive does not contain library markup");
    Err(ExportError::MissingArchiveEntry {
        expected: suffix.to_string(),
    })
}

/// Tally visible pages, content and components.
pub fn count_nodes(tree: &ContentTree) -> NodeCounts {
    let mut counts = NodeCounts::default();
    tree.traverse(
        |node| match node.node_type {
            NodeType::Page => counts.pages += 1,
            NodeType::Content => counts.contents += 1,
            NodeType::Component => counts.components += 1,
            NodeType::Library | NodeType::Static => {}
        },
        TraverseOptions::visible(),
    );
    counts
}

/// Ids of visible static assets, de-duplicated in traversal order.
pub fn collect_asset_ids(tree: &ContentTree) -> Vec<String> {
    let ids: Vec<&str> = tree
        .nodes(TraverseOptions::visible())
        .filter(|n| n.node_type == NodeType::Static)
        .map(|n| n.id.as_str())
        .collect();
    dedupe_preserving_order(&ids)
}

/// Write `bytes` to `path`, creating parent directories first.
pub async fn write_local_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// Export the selected part of a content library into `output_dir`.
pub async fn export_content<J, A>(
    jobs: &J,
    assets: &A,
    identifiers: &[String],
    library_id: &str,
    output_dir: &Path,
    options: &ExportOptions,
) -> Result<ExportResult, ExportError>
where
    J: ArchiveJobs + ?Sized,
    A: AssetFetcher + ?Sized,
{
    info!(
        library_id,
        output_dir = %output_dir.display(),
        identifiers = identifiers.len(),
        site_library = options.is_site_library,
        offline = options.offline,
        "[EXPORT] Starting content export"
    );
    let layout = LibraryLayout::new(library_id, options.is_site_library);

    let FetchedLibrary { mut tree, .. } = fetch_content_library(jobs, library_id, options).await?;

    select_and_promote(&mut tree, identifiers, &options.select_options()).map_err(|e| {
        error!(error = %e, "[EXPORT] Selection failed");
        e
    })?;

    let counts = count_nodes(&tree);
    let asset_ids = collect_asset_ids(&tree);
    info!(
        pages = counts.pages,
        contents = counts.contents,
        components = counts.components,
        assets = asset_ids.len(),
        "[EXPORT] Selection counted"
    );

    let report = if options.offline {
        info!(assets = asset_ids.len(), "[EXPORT] Offline mode, skipping asset transfer");
        TransferReport::default()
    } else {
        let transfer_options = TransferOptions {
            concurrency: options.concurrency,
            on_progress: options.on_asset_progress.clone(),
        };
        transfer_assets(
            &asset_ids,
            |id| {
                let remote = layout.remote_asset_path(&id);
                async move { assets.fetch_asset(&remote).await }
            },
            |id, bytes| {
                let path = output_dir.join(layout.asset_path(&id));
                async move {
                    write_local_file(&path, &bytes)
                        .await
                        .map_err(BoxError::from)
                }
            },
            &transfer_options,
        )
        .await
    };

    let markup = tree.to_markup_string(TraverseOptions::visible())?;
    let markup_path = output_dir.join(layout.markup_path());
    write_local_file(&markup_path, markup.as_bytes())
        .await
        .map_err(|source| {
            error!(error = ?source, path = %markup_path.display(), "[EXPORT] Failed to write library markup");
            ExportError::Io {
                path: markup_path.clone(),
                source,
            }
        })?;

    info!(
        markup = %markup_path.display(),
        downloaded = report.succeeded.len(),
        failed = report.failed.len(),
        "[EXPORT] Content export complete"
    );

    Ok(ExportResult {
        page_count: counts.pages,
        content_count: counts.contents,
        component_count: counts.components,
        downloaded_assets: report.succeeded,
        failed_assets: report.failed,
        output_dir: output_dir.to_path_buf(),
        markup_path,
        tree,
    })
}
