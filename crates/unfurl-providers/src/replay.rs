//! In-memory transports for recorded sessions.
//!
//! A replay is a script of deliveries, pauses and failures. Each `open`
//! plays the script from the start on a spawned task and stops as soon as
//! the consumer drops the stream.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{ByteStream, JobSnapshot, SnapshotSource, StreamTransport, TransportError};

#[derive(Debug, Clone)]
pub enum ReplayStep {
    /// One transport delivery.
    Deliver(Bytes),
    /// Wait before the next step.
    Pause(Duration),
    /// Break the connection with a transport-level error.
    Fail(String),
}

#[derive(Debug, Clone, Default)]
pub struct ReplayTransport {
    steps: Vec<ReplayStep>,
    open_failure: Option<String>,
    opens: Arc<AtomicUsize>,
    delivered: Arc<AtomicUsize>,
}

impl ReplayTransport {
    pub fn new(steps: Vec<ReplayStep>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// One delivery per line of `text`, newline included.
    pub fn from_text(text: &str) -> Self {
        let steps = text
            .lines()
            .map(|line| ReplayStep::Deliver(Bytes::from(format!("{}\n", line))))
            .collect();
        Self::new(steps)
    }

    /// Load a recorded frame log (one frame per line).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_text(&text))
    }

    /// Make every `open` call fail before any delivery.
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            open_failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Insert a pause between consecutive deliveries.
    pub fn with_pacing(self, delay: Duration) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() * 2);
        for step in self.steps {
            if !steps.is_empty() {
                steps.push(ReplayStep::Pause(delay));
            }
            steps.push(step);
        }
        Self { steps, ..self }
    }

    pub fn then(mut self, step: ReplayStep) -> Self {
        self.steps.push(step);
        self
    }

    /// How many times the stream was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// How many deliveries reached a consumer.
    pub fn delivered_count(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open(&self, job_id: &str) -> Result<ByteStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.open_failure {
            return Err(TransportError::Connect {
                url: format!("replay://{}", job_id),
                message: message.clone(),
            });
        }

        let (tx, rx) = mpsc::channel(16);
        let steps = self.steps.clone();
        let delivered = self.delivered.clone();

        tokio::spawn(async move {
            for step in steps {
                match step {
                    ReplayStep::Deliver(bytes) => {
                        if tx.send(Ok(bytes)).await.is_err() {
                            debug!("Replay receiver dropped, stopping");
                            return;
                        }
                        delivered.fetch_add(1, Ordering::SeqCst);
                    }
                    ReplayStep::Pause(delay) => tokio::time::sleep(delay).await,
                    ReplayStep::Fail(message) => {
                        let _ = tx.send(Err(TransportError::Stream(message))).await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Snapshot source with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticSnapshotSource {
    answer: Result<JobSnapshot, String>,
    fetches: Arc<AtomicUsize>,
}

impl StaticSnapshotSource {
    pub fn new(snapshot: JobSnapshot) -> Self {
        Self {
            answer: Ok(snapshot),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            answer: Err(message.into()),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<JobSnapshot, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Ok(snapshot) => Ok(snapshot.clone()),
            Err(message) => Err(TransportError::Connect {
                url: format!("replay://{}", job_id),
                message: message.clone(),
            }),
        }
    }
}
