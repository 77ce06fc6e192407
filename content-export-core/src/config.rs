use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::WaitOptions;
use crate::export::ExportOptions;
use crate::parser::DEFAULT_ASSET_QUERY;
use crate::transfer::DEFAULT_CONCURRENCY;

/// Export settings as they appear in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Library id (shared library) or site id (site library).
    pub library: String,
    #[serde(default)]
    pub site_library: bool,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default = "default_asset_query")]
    pub asset_query: Vec<String>,
    #[serde(default)]
    pub keep_orphans: bool,
    #[serde(default)]
    pub offline: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub library_file: Option<PathBuf>,
}

fn default_asset_query() -> Vec<String> {
    DEFAULT_ASSET_QUERY.iter().map(|s| s.to_string()).collect()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    600
}

impl ExportSettings {
    pub fn trace_loaded(&self) {
        info!(
            library = %self.library,
            site_library = self.site_library,
            output_dir = %self.output_dir.display(),
            ids = self.ids.len(),
            offline = self.offline,
            "Loaded export settings"
        );
        debug!(?self, "Export settings loaded (full debug)");
    }

    /// Pipeline options for these settings. No progress callback is attached.
    pub fn to_options(&self) -> ExportOptions {
        ExportOptions {
            is_site_library: self.site_library,
            library_file: self.library_file.clone(),
            offline: self.offline,
            use_pattern: self.regex,
            folders: self.folders.clone(),
            asset_query: self.asset_query.clone(),
            keep_orphans: self.keep_orphans,
            concurrency: self.concurrency,
            wait: WaitOptions {
                timeout: Duration::from_secs(self.timeout_secs),
                ..WaitOptions::default()
            },
            on_asset_progress: None,
        }
    }
}
