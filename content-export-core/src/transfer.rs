//! Bounded-concurrency asset transfer with per-asset failure capture.
//!
//! Assets are processed in sequential batches of `concurrency` items. Within a
//! batch every fetch+write runs concurrently on the calling task; the next
//! batch starts only after every operation of the current one has finished.
//! A failing asset is recorded in [`TransferReport::failed`] and never stops
//! its siblings or later batches. There is no retry.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::BoxError;

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Reported once per finished operation, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetProgress {
    pub id: String,
    /// Operations finished so far, this one included.
    pub completed: usize,
    pub total: usize,
    pub success: bool,
}

pub type ProgressFn = dyn Fn(&AssetProgress) + Send + Sync;

#[derive(Clone)]
pub struct TransferOptions {
    /// Batch size. Zero is treated as one.
    pub concurrency: usize,
    pub on_progress: Option<Arc<ProgressFn>>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            on_progress: None,
        }
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("concurrency", &self.concurrency)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailedAsset {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedAsset>,
    /// Number of batches executed.
    pub batches: usize,
}

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedupe_preserving_order<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.as_ref())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Fetch and write every asset in `asset_ids`.
///
/// `fetch_one` receives the asset id and returns its bytes; `write_one`
/// receives the id and the fetched bytes. Either failing marks the asset as
/// failed with a message naming the step.
pub async fn transfer_assets<F, FF, W, WF>(
    asset_ids: &[String],
    fetch_one: F,
    write_one: W,
    options: &TransferOptions,
) -> TransferReport
where
    F: Fn(String) -> FF,
    FF: Future<Output = Result<Vec<u8>, BoxError>>,
    W: Fn(String, Vec<u8>) -> WF,
    WF: Future<Output = Result<(), BoxError>>,
{
    let ids = dedupe_preserving_order(asset_ids);
    let total = ids.len();
    let concurrency = options.concurrency.max(1);
    let mut report = TransferReport::default();
    let mut completed = 0usize;

    info!(total, concurrency, "[EXPORT][TRANSFER] Starting asset transfer");

    for (batch_index, batch) in ids.chunks(concurrency).enumerate() {
        report.batches += 1;
        debug!(batch = batch_index, size = batch.len(), "[EXPORT][TRANSFER] Starting batch");

        let write_one = &write_one;
        let mut in_flight: FuturesUnordered<_> = batch
            .iter()
            .map(|id| {
                let id = id.clone();
                let fetch = fetch_one(id.clone());
                async move {
                    let outcome = match fetch.await {
                        Ok(bytes) => write_one(id.clone(), bytes)
                            .await
                            .map_err(|e| format!("write failed: {e}")),
                        Err(e) => Err(format!("fetch failed: {e}")),
                    };
                    (id, outcome)
                }
            })
            .collect();

        while let Some((id, outcome)) = in_flight.next().await {
            completed += 1;
            let success = outcome.is_ok();
            match outcome {
                Ok(()) => {
                    debug!(asset = %id, completed, total, "[EXPORT][TRANSFER] Asset transferred");
                    report.succeeded.push(id.clone());
                }
                Err(message) => {
                    error!(asset = %id, error = %message, "[EXPORT][TRANSFER] Asset transfer failed");
                    report.failed.push(FailedAsset {
                        id: id.clone(),
                        error: message,
                    });
                }
            }
            if let Some(on_progress) = &options.on_progress {
                on_progress(&AssetProgress {
                    id,
                    completed,
                    total,
                    success,
                });
            }
        }
    }

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        batches = report.batches,
        "[EXPORT][TRANSFER] Asset transfer finished"
    );
    report
}
