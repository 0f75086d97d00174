//! Collaborator seams: the live stream and the job snapshot store.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;

/// Raw deliveries from a live stream connection.
///
/// Dropping the stream closes the underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_connect() || e.is_timeout() {
            TransportError::Connect {
                url,
                message: e.to_string(),
            }
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Stream(e.to_string())
        }
    }
}

/// Opens the live frame stream for a generation job.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, job_id: &str) -> Result<ByteStream, TransportError>;
}

/// One-shot lookup of a job's last known state.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<JobSnapshot, TransportError>;
}

pub const STATUS_COMPLETED: &str = "completed";

/// Last known state of a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: String,
    #[serde(default)]
    pub results: Option<Vec<JobResult>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn completed(results: Vec<JobResult>) -> Self {
        Self {
            status: STATUS_COMPLETED.to_string(),
            results: Some(results),
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub data: Value,
}
