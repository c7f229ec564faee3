//! Request-side client for a running mediaforge server.
//!
//! Used by the `submit` subcommand to exercise the service end to end:
//! upload a file, request an operation, and save the returned artifact
//! (or print the metadata record).

use anyhow::{Context, Result};
use reqwest::multipart;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// What a remote submission produced on the local side.
#[derive(Debug)]
pub enum Delivered {
    /// The artifact was saved to this path.
    File(PathBuf),
    /// The metadata record, pretty-printed JSON.
    Metadata(String),
}

/// Minimal view of the job resource returned by the server.
#[derive(Debug, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    pub state: String,
}

/// Typed failure body returned by the server.
#[derive(Debug, Deserialize)]
struct RemoteFailure {
    kind: String,
    message: String,
}

pub struct ForgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl ForgeClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Upload a file and submit a job for it.
    pub async fn submit(
        &self,
        file: &Path,
        operation: &str,
        width: Option<i64>,
        height: Option<i64>,
    ) -> Result<RemoteJob> {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let mut form = multipart::Form::new()
            .text("operation", operation.to_string())
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));

        if let Some(width) = width {
            form = form.text("width", width.to_string());
        }
        if let Some(height) = height {
            form = form.text("height", height.to_string());
        }

        let response = self
            .http
            .post(self.url("/jobs"))
            .multipart(form)
            .send()
            .await
            .context("Failed to submit job")?;

        if !response.status().is_success() {
            anyhow::bail!("Submission rejected: {}", remote_error(response).await);
        }

        let job: RemoteJob = response.json().await.context("Malformed job resource")?;
        tracing::info!(job_id = %job.id, "Job submitted to server");
        Ok(job)
    }

    /// Wait for a job's result and deliver it.
    ///
    /// The result endpoint suspends server-side until the job is terminal, so
    /// a single request covers the wait. File artifacts are streamed to
    /// `destination` (or the server-suggested filename in the current
    /// directory); metadata comes back as a JSON string.
    pub async fn deliver_result(
        &self,
        job_id: &str,
        destination: Option<&Path>,
    ) -> Result<Delivered> {
        let mut response = self
            .http
            .get(self.url(&format!("/jobs/{}/result", job_id)))
            .send()
            .await
            .context("Failed to fetch result")?;

        if !response.status().is_success() {
            anyhow::bail!("Job failed: {}", remote_error(response).await);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("application/json") {
            let value: serde_json::Value = response.json().await.context("Malformed metadata")?;
            return Ok(Delivered::Metadata(serde_json::to_string_pretty(&value)?));
        }

        let destination = match destination {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(suggested_filename(&response).unwrap_or_else(|| "output".into())),
        };

        let mut file = tokio::fs::File::create(&destination)
            .await
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        while let Some(chunk) = response.chunk().await.context("Download interrupted")? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(Delivered::File(destination))
    }
}

/// Pull the suggested filename out of a Content-Disposition header.
fn suggested_filename(response: &reqwest::Response) -> Option<String> {
    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    let name = disposition.split("filename=").nth(1)?;
    let name = name.trim().trim_matches('"');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

async fn remote_error(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<RemoteFailure>().await {
        Ok(failure) => format!("{} ({}): {}", failure.kind, status, failure.message),
        Err(_) => format!("HTTP {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ForgeClient::new("http://localhost:8350/");
        assert_eq!(client.url("/jobs"), "http://localhost:8350/api/jobs");
    }
}
