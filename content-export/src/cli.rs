/// # content-export CLI interface
///
/// Command parsing and orchestration glue for the `content-export` binary.
/// The tree model, selection, transfer and export pipeline live in
/// [`content_export_core`]; this module only maps flags and config onto
/// [`ExportOptions`], builds the platform client and prints results.
///
/// ## How To Use
/// - Command line: `content-export export --config export.yaml homepage about-us`
/// - Programmatic or integration use: call [`run`] with a constructed [`Cli`].
use crate::instance::InstanceClient;
use crate::load_config::load_config;
use crate::output::{format_summary, render_outline};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use content_export_core::export::{export_content, fetch_content_library, ExportOptions};
use content_export_core::selection::select_and_promote;
use content_export_core::transfer::{AssetProgress, ProgressFn};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for content-export: pull content library pages and components with their assets.
#[derive(Parser)]
#[clap(
    name = "content-export",
    version,
    about = "Export selected pages, content and components of a content library with their static assets"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export content from a library using the given config file
    Export {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,

        /// Page, content or component ids to export; replaces the config's `ids`
        ids: Vec<String>,

        /// Read library markup from this file instead of running an export job
        #[clap(long)]
        library_file: Option<PathBuf>,

        /// Directory the export is written to
        #[clap(long)]
        output_dir: Option<PathBuf>,

        /// Skip downloading static assets
        #[clap(long)]
        offline: bool,

        /// Treat ids as regular expressions
        #[clap(long)]
        regex: bool,

        /// Only export pages and content classified in this folder (repeatable)
        #[clap(long = "folder")]
        folders: Vec<String>,

        /// Print the selected tree without transferring or writing anything
        #[clap(long)]
        dry_run: bool,

        /// Print the export result as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Export {
            config,
            ids,
            library_file,
            output_dir,
            offline,
            regex,
            folders,
            dry_run,
            json,
        } => {
            let config = load_config(config)?;
            let mut settings = config.export;

            if !ids.is_empty() {
                settings.ids = ids;
            }
            if library_file.is_some() {
                settings.library_file = library_file;
            }
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            settings.offline |= offline;
            settings.regex |= regex;
            if !folders.is_empty() {
                settings.folders = folders;
            }

            if settings.ids.is_empty() {
                tracing::error!(command = "export", "No content ids given");
                bail!("No content ids given: pass ids on the command line or set export.ids in the config");
            }

            let client = InstanceClient::from_section(&config.instance);
            let mut options: ExportOptions = settings.to_options();

            if dry_run {
                tracing::info!(command = "export", library = %settings.library, "Starting dry run");
                let mut fetched = fetch_content_library(&client, &settings.library, &options).await?;
                select_and_promote(&mut fetched.tree, &settings.ids, &options.select_options())?;
                print!("{}", render_outline(&fetched.tree));
                return Ok(());
            }

            if !json {
                let progress: Arc<ProgressFn> = Arc::new(|p: &AssetProgress| {
                    let mark = if p.success { "ok" } else { "FAILED" };
                    eprintln!("[{}/{}] {} {}", p.completed, p.total, p.id, mark);
                });
                options.on_asset_progress = Some(progress);
            }

            tracing::info!(command = "export", library = %settings.library, "Starting export");
            match export_content(
                &client,
                &client,
                &settings.ids,
                &settings.library,
                &settings.output_dir,
                &options,
            )
            .await
            {
                Ok(result) => {
                    tracing::info!(
                        command = "export",
                        failed_assets = result.failed_assets.len(),
                        "Export complete"
                    );
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        print!("{}", format_summary(&result));
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "export", error = %e, "Export failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}
