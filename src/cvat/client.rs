//! HTTP client for the CVAT REST API.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use derive_builder::Builder;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use super::source::{AnnotationSource, collect_pages};
use super::types::{
    ExportRequest, Job, Label, Page, RequestState, RequestStatus, Task, TaskAnnotations,
};
use crate::config::{
    CvatParams, EXPORT_MAX_POLLS, EXPORT_POLL_INTERVAL, LABEL_PAGE_SIZE, REQUEST_TIMEOUT,
    TASK_PAGE_SIZE,
};

#[derive(Builder)]
pub struct CvatClientArgs {
    #[builder(setter(into))]
    host: String,
    port: u16,
    #[builder(setter(into))]
    username: String,
    #[builder(setter(into))]
    password: String,
    #[builder(default = "TASK_PAGE_SIZE")]
    task_page_size: u32,
    #[builder(default = "LABEL_PAGE_SIZE")]
    label_page_size: u32,
    #[builder(default = "EXPORT_POLL_INTERVAL")]
    export_poll_interval: Duration,
    #[builder(default = "EXPORT_MAX_POLLS")]
    export_max_polls: u32,
}

impl CvatClientArgsBuilder {
    /// Prefill connection settings from the project configuration
    pub fn from_params(params: &CvatParams) -> Self {
        let mut builder = Self::default();
        builder
            .host(params.host.as_str())
            .port(params.port)
            .username(params.username.as_str())
            .password(params.password.as_str());
        builder
    }
}

/// CVAT server client authenticating with HTTP basic auth
pub struct CvatClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    task_page_size: u32,
    label_page_size: u32,
    export_poll_interval: Duration,
    export_max_polls: u32,
}

/// Build the server base URL from the configured host and port
///
/// The host may be given with or without a scheme; plain hosts use http.
pub(crate) fn base_url(host: &str, port: u16) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    let mut url =
        Url::parse(&with_scheme).with_context(|| format!("Invalid CVAT host '{}'", host))?;
    url.set_port(Some(port))
        .map_err(|_| anyhow!("CVAT host '{}' cannot carry a port", host))?;
    Ok(url)
}

/// Short lowercase name of an export format, e.g. "Datumaro 1.0" -> "datumaro"
pub fn format_slug(format: &str) -> String {
    let slug: String = format
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if slug.is_empty() {
        "annotations".to_string()
    } else {
        slug
    }
}

impl CvatClient {
    pub fn new(args: CvatClientArgs) -> Result<Self> {
        let CvatClientArgs {
            host,
            port,
            username,
            password,
            task_page_size,
            label_page_size,
            export_poll_interval,
            export_max_polls,
        } = args;

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url(&host, port)?,
            username,
            password,
            task_page_size,
            label_page_size,
            export_poll_interval,
            export_max_polls,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid API path '{}'", path))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("Request failed: {}", what))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", what, status, body);
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let request = self.http.get(self.endpoint(path)?).query(query);
        let response = self.send(request, what).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode response: {}", what))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
        page: u32,
        page_size: u32,
        what: &str,
    ) -> Result<Page<T>> {
        query.push(("page", page.to_string()));
        query.push(("page_size", page_size.to_string()));
        self.get_json(path, &query, what).await
    }

    /// Poll an export request until the archive is ready, returning its URL
    async fn wait_for_export(&self, rq_id: &str) -> Result<String> {
        let path = format!("/api/requests/{}", rq_id);
        for attempt in 1..=self.export_max_polls {
            let state: RequestState = self.get_json(&path, &[], "poll export request").await?;
            match state.status {
                RequestStatus::Finished => {
                    return state.result_url.ok_or_else(|| {
                        anyhow!("Export request {} finished without a result URL", rq_id)
                    });
                }
                RequestStatus::Failed => {
                    anyhow::bail!(
                        "Export request {} failed: {}",
                        rq_id,
                        state.message.unwrap_or_default()
                    );
                }
                RequestStatus::Queued | RequestStatus::Started => {
                    debug!(
                        "Export request {} still {:?} (poll {})",
                        rq_id, state.status, attempt
                    );
                    tokio::time::sleep(self.export_poll_interval).await;
                }
            }
        }
        anyhow::bail!(
            "Export request {} did not finish after {} polls",
            rq_id,
            self.export_max_polls
        )
    }
}

#[async_trait]
impl AnnotationSource for CvatClient {
    async fn list_labels(&self, project_id: u64) -> Result<Vec<Label>> {
        collect_pages(|page| {
            self.get_page(
                "/api/labels",
                vec![("project_id", project_id.to_string())],
                page,
                self.label_page_size,
                "list labels",
            )
        })
        .await
    }

    async fn list_tasks(&self, project_name: &str) -> Result<Vec<Task>> {
        let tasks: Vec<Task> = collect_pages(|page| {
            self.get_page(
                "/api/tasks",
                vec![("project_name", project_name.to_string())],
                page,
                self.task_page_size,
                "list tasks",
            )
        })
        .await?;
        info!("Found a total of {} tasks for the project", tasks.len());
        Ok(tasks)
    }

    async fn list_jobs(&self, task_id: u64) -> Result<Vec<Job>> {
        collect_pages(|page| {
            self.get_page(
                "/api/jobs",
                vec![("task_id", task_id.to_string())],
                page,
                self.task_page_size,
                "list jobs",
            )
        })
        .await
    }

    async fn task_annotations(&self, task_id: u64) -> Result<TaskAnnotations> {
        debug!("Fetching annotations for task {}", task_id);
        self.get_json(
            &format!("/api/tasks/{}/annotations", task_id),
            &[],
            "retrieve task annotations",
        )
        .await
    }

    async fn export_annotations(&self, task_id: u64, format: &str, dest: &Path) -> Result<()> {
        let request = self
            .http
            .post(self.endpoint(&format!("/api/tasks/{}/dataset/export", task_id))?)
            .query(&[("format", format), ("save_images", "false")]);
        let response = self.send(request, "start dataset export").await?;
        if response.status() != StatusCode::ACCEPTED {
            debug!("Dataset export answered {}", response.status());
        }
        let export: ExportRequest = response
            .json()
            .await
            .context("Failed to decode dataset export response")?;

        let result_url = self.wait_for_export(&export.rq_id).await?;
        let download_url = self
            .base_url
            .join(&result_url)
            .with_context(|| format!("Invalid export result URL '{}'", result_url))?;

        let archive = self
            .send(self.http.get(download_url), "download export archive")
            .await?
            .bytes()
            .await
            .context("Failed to read export archive")?;

        fs::write(dest, &archive)
            .await
            .with_context(|| format!("Failed to write archive {}", dest.display()))?;
        Ok(())
    }
}
