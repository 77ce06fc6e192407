#![doc = "content-export-core: core logic library for content-export."]

//! This crate holds the content library tree model, the selection engine, the
//! asset transfer pipeline and the export orchestrator. Platform transport
//! (authentication, job API, file store) lives behind the traits in
//! [`contract`] and is implemented by the CLI crate.
//!
//! # Usage
//! Call [`export::export_content`] with implementations of
//! [`contract::ArchiveJobs`] and [`contract::AssetFetcher`], or
//! [`export::fetch_content_library`] for a dry run.

pub mod config;
pub mod contract;
pub mod error;
pub mod export;
pub mod markup;
pub mod parser;
pub mod selection;
pub mod transfer;
pub mod tree;

pub use error::{ExportError, JobError, ParseError, SelectionError};
pub use export::{export_content, fetch_content_library, ExportOptions, ExportResult, LibraryLayout};
pub use tree::{ContentNode, ContentTree, NodeId, NodeType, TraverseOptions};
