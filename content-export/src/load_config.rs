/// `load_config` module: reads the YAML export config and fills instance
/// details from the environment.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file into [`CliConfig`]
/// - Fall back to `SFCC_SERVER` when `instance.hostname` is absent
/// - Report failures with clear diagnostics at the CLI boundary
///
/// Client credentials are never read from the file; see
/// [`crate::instance::Credentials::from_env`].
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced by the CLI.
use anyhow::Result;
use content_export_core::config::ExportSettings;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceSection {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub instance: InstanceSection,
    pub export: ExportSettings,
}

/// Loads a YAML config file (no secrets) and resolves the instance hostname.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.instance.hostname.is_none() {
        config.instance.hostname = env::var("SFCC_SERVER").ok().filter(|h| !h.is_empty());
    }

    config.export.trace_loaded();
    Ok(config)
}
