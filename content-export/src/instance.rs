//! # Instance client
//!
//! [`InstanceClient`] wires the [`ArchiveJobs`] and [`AssetFetcher`] traits
//! from `content-export-core` to a real commerce platform instance:
//!
//! - OAuth client-credentials token from the account manager, cached per client
//! - Archive export through the data API's `sfcc-site-archive-export` job,
//!   polled until it finishes or the wait timeout elapses
//! - Archive and asset downloads over the instance's WebDAV file store
//!
//! Credentials come from the environment (`SFCC_CLIENT_ID`,
//! `SFCC_CLIENT_SECRET`). They are only required once a request is made, so a
//! run that reads a local library file in offline mode needs none.

use std::env;
use std::time::Instant;

use async_trait::async_trait;
use content_export_core::contract::{ArchiveJobs, AssetFetcher, BoxError, JobError, WaitOptions};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::load_config::InstanceSection;

pub const DEFAULT_API_VERSION: &str = "v23_2";
const ACCOUNT_MANAGER_TOKEN_URL: &str = "https://account.demandware.com/dwsso/oauth2/access_token";
const EXPORT_JOB_ID: &str = "sfcc-site-archive-export";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    /// Reads `SFCC_CLIENT_ID` and `SFCC_CLIENT_SECRET`; `None` when either is missing.
    pub fn from_env() -> Option<Self> {
        match (env::var("SFCC_CLIENT_ID"), env::var("SFCC_CLIENT_SECRET")) {
            (Ok(client_id), Ok(client_secret)) => Some(Self {
                client_id,
                client_secret,
            }),
            _ => None,
        }
    }
}

pub struct InstanceClient {
    http: reqwest::Client,
    hostname: Option<String>,
    api_version: String,
    credentials: Option<Credentials>,
    token: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct JobExecution {
    id: String,
    execution_status: String,
    #[serde(default)]
    exit_status: Option<ExitStatus>,
}

#[derive(Debug, Deserialize)]
struct ExitStatus {
    code: String,
}

impl InstanceClient {
    pub fn new(
        hostname: Option<String>,
        api_version: Option<String>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            hostname,
            api_version: api_version.unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Build a client from the config's instance section and environment credentials.
    pub fn from_section(section: &InstanceSection) -> Self {
        let credentials = Credentials::from_env();
        info!(
            hostname = section.hostname.as_deref().unwrap_or("<unset>"),
            credentials_set = credentials.is_some(),
            "Initialized InstanceClient"
        );
        Self::new(section.hostname.clone(), section.api_version.clone(), credentials)
    }

    fn host(&self) -> Result<&str, BoxError> {
        self.hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| "no instance hostname configured (instance.hostname or SFCC_SERVER)".into())
    }

    fn job_url(&self, suffix: &str) -> Result<String, BoxError> {
        Ok(format!(
            "https://{}/s/-/dw/data/{}/jobs/{}/executions{}",
            self.host()?,
            self.api_version,
            EXPORT_JOB_ID,
            suffix
        ))
    }

    fn webdav_url(&self, path: &str) -> Result<String, BoxError> {
        Ok(format!(
            "https://{}/on/demandware.servlet/webdav/Sites/{}",
            self.host()?,
            path.trim_start_matches('/')
        ))
    }

    async fn access_token(&self) -> Result<String, BoxError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let credentials = self
            .credentials
            .as_ref()
            .ok_or("SFCC_CLIENT_ID / SFCC_CLIENT_SECRET are not set")?;

        debug!("Requesting access token");
        let response = self
            .http
            .post(ACCOUNT_MANAGER_TOKEN_URL)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Access token request rejected");
            return Err(format!("access token request failed with {status}: {body}").into());
        }
        let token: TokenResponse = response.json().await?;
        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn start_export(&self, data_units: &serde_json::Value, file: &str) -> Result<JobExecution, BoxError> {
        let token = self.access_token().await?;
        let body = serde_json::json!({ "export_file": file, "data_units": data_units });
        let response = self
            .http
            .post(self.job_url("")?)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, "Starting export job was rejected");
            return Err(format!("starting export job failed with {status}: {text}").into());
        }
        Ok(response.json().await?)
    }

    async fn execution(&self, id: &str) -> Result<JobExecution, BoxError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.job_url(&format!("/{id}"))?)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn webdav_get(&self, path: &str) -> Result<Vec<u8>, BoxError> {
        let token = self.access_token().await?;
        let url = self.webdav_url(path)?;
        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET {url} returned {status}").into());
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn webdav_delete(&self, path: &str) -> Result<(), BoxError> {
        let token = self.access_token().await?;
        self.http
            .delete(self.webdav_url(path)?)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveJobs for InstanceClient {
    async fn run_export_job(
        &self,
        data_units: &serde_json::Value,
        wait: &WaitOptions,
    ) -> Result<Vec<u8>, JobError> {
        let file = format!("content-export-{}.zip", Uuid::new_v4());
        let started = Instant::now();

        let execution = self
            .start_export(data_units, &file)
            .await
            .map_err(JobError::Transport)?;
        info!(execution_id = %execution.id, file = %file, "Export job started");

        let mut current = execution;
        loop {
            if current.execution_status == "finished" {
                let code = current.exit_status.map(|s| s.code).unwrap_or_default();
                if code != "OK" {
                    error!(execution_id = %current.id, code = %code, "Export job finished unsuccessfully");
                    return Err(JobError::Failed { status: code });
                }
                break;
            }
            if started.elapsed() >= wait.timeout {
                error!(execution_id = %current.id, "Timed out waiting for export job");
                return Err(JobError::Timeout {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(wait.poll_interval).await;
            current = self.execution(&current.id).await.map_err(JobError::Transport)?;
            debug!(execution_id = %current.id, status = %current.execution_status, "Polled export job");
        }

        let impex_path = format!("Impex/src/instance/{file}");
        let archive = self
            .webdav_get(&impex_path)
            .await
            .map_err(JobError::Transport)?;
        if let Err(e) = self.webdav_delete(&impex_path).await {
            warn!(error = %e, file = %file, "Failed to delete export archive from instance");
        }
        Ok(archive)
    }
}

#[async_trait]
impl AssetFetcher for InstanceClient {
    async fn fetch_asset(&self, remote_path: &str) -> Result<Vec<u8>, BoxError> {
        debug!(remote_path, "Fetching asset");
        self.webdav_get(remote_path).await
    }
}
