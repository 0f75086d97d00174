use async_trait::async_trait;
use futures_util::stream::StreamExt;
use reqwest::Client;
use tracing::debug;

use crate::{ByteStream, JobSnapshot, SnapshotSource, StreamTransport, TransportError};

pub const DEFAULT_STREAM_PATH: &str = "/jobs/{job_id}/stream";
pub const DEFAULT_SNAPSHOT_PATH: &str = "/jobs/{job_id}";

/// HTTP client for the generation job service.
///
/// The live stream is a chunked `GET` whose body is the line framing decoded
/// by [`crate::FrameDecoder`]; snapshots are a plain JSON `GET`.
#[derive(Clone)]
pub struct HttpJobClient {
    client: Client,
    base_url: String,
    stream_path: String,
    snapshot_path: String,
    bearer_token: Option<String>,
    name: String,
}

impl HttpJobClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        // Normalize base url - remove trailing slash if present
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Self {
            client: Client::new(),
            base_url,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            snapshot_path: DEFAULT_SNAPSHOT_PATH.to_string(),
            bearer_token: None,
            name: "http".to_string(),
        }
    }

    /// Override the path templates. Both must contain `{job_id}`.
    pub fn with_paths(mut self, stream_path: impl Into<String>, snapshot_path: impl Into<String>) -> Self {
        self.stream_path = stream_path.into();
        self.snapshot_path = snapshot_path.into();
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn stream_url(&self, job_id: &str) -> String {
        self.url_for(&self.stream_path, job_id)
    }

    pub fn snapshot_url(&self, job_id: &str) -> String {
        self.url_for(&self.snapshot_path, job_id)
    }

    fn url_for(&self, template: &str, job_id: &str) -> String {
        let path = template.replace("{job_id}", job_id);
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| TransportError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl StreamTransport for HttpJobClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, job_id: &str) -> Result<ByteStream, TransportError> {
        let url = self.stream_url(job_id);
        debug!("Opening live stream: {}", url);

        let response = self.get(&url).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl SnapshotSource for HttpJobClient {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<JobSnapshot, TransportError> {
        let url = self.snapshot_url(job_id);
        debug!("Fetching job snapshot: {}", url);

        let response = self.get(&url).await?;
        response
            .json::<JobSnapshot>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_templates() {
        let client = HttpJobClient::new("http://localhost:8080/api/");
        assert_eq!(
            client.stream_url("job-1"),
            "http://localhost:8080/api/jobs/job-1/stream"
        );
        assert_eq!(client.snapshot_url("job-1"), "http://localhost:8080/api/jobs/job-1");

        let client = client.with_paths("generate/{job_id}/events", "generate/{job_id}");
        assert_eq!(
            client.stream_url("abc"),
            "http://localhost:8080/api/generate/abc/events"
        );
    }
}
