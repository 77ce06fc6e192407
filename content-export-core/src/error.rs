//! Error types for content library parsing, selection and export.
//!
//! Everything here is fatal for an export run. Per-asset transfer failures are
//! not errors in this sense: they are returned as data in
//! [`crate::transfer::TransferReport`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error used at collaborator boundaries (transport, filesystem).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while reading or writing library markup.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("invalid escape sequence: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("unexpected document root <{found}>, expected <library>")]
    UnexpectedRoot { found: String },

    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    #[error("unbalanced markup: {0}")]
    Unbalanced(String),

    #[error("failed to write markup: {0}")]
    Write(#[from] std::io::Error),
}

/// Errors raised by the selection engine before the tree is touched.
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("invalid identifier pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors reported by an archive export job collaborator.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("export job did not finish within {waited:?}")]
    Timeout { waited: Duration },

    #[error("export job failed with status {status}")]
    Failed { status: String },

    #[error("export job transport error: {0}")]
    Transport(BoxError),
}

/// Fatal errors from [`crate::export::export_content`] and
/// [`crate::export::fetch_content_library`].
#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("ZIP error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive has no entry ending with '{expected}' (library/site mismatch?)")]
    MissingArchiveEntry { expected: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
