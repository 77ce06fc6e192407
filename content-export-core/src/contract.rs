//! # contract: collaborator interfaces for content export
//!
//! The export pipeline talks to the remote platform through two traits:
//!
//! - [`ArchiveJobs`] runs a server-side archive export job and hands back the
//!   compressed archive bytes.
//! - [`AssetFetcher`] downloads one static asset by its remote path.
//!
//! Neither trait says anything about authentication or transport. The CLI
//! crate provides a `reqwest` implementation; tests use the `mockall`
//! generated `MockArchiveJobs` / `MockAssetFetcher` (enabled by the
//! `test-export-mocks` feature).
//!
//! Local filesystem access is not abstracted: the orchestrator uses
//! `tokio::fs` directly.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

pub use crate::error::{BoxError, JobError};

/// How long to wait for an archive export job, and how often to poll it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Runs archive export jobs on the remote platform.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ArchiveJobs: Send + Sync {
    /// Export `data_units` into an archive, wait for the job within `wait`,
    /// and return the downloaded archive bytes.
    async fn run_export_job(
        &self,
        data_units: &serde_json::Value,
        wait: &WaitOptions,
    ) -> Result<Vec<u8>, JobError>;
}

/// Downloads static assets from the remote platform.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch one asset by its path relative to the platform's file root
    /// (e.g. `Libraries/SharedLibrary/default/images/hero.jpg`).
    async fn fetch_asset(&self, remote_path: &str) -> Result<Vec<u8>, BoxError>;
}
