//! Async session driver.
//!
//! A [`StreamEngine`] owns at most one live session. Each session runs on
//! its own task: it opens the transport, feeds deliveries through a
//! [`StreamPipeline`], coalesces parses, falls back to the job snapshot when
//! the connection breaks, and publishes deduplicated snapshots on a watch
//! channel. Cancelling the session drops the transport stream, which closes
//! the connection, and no frame is processed afterwards.

use futures_util::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use unfurl_providers::{ByteStream, FrameDecoder, SnapshotSource, StreamTransport, TransportError};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::extractor::{TolerantExtractor, ValueExtractor};
use crate::fallback::resume_from_snapshot;
use crate::pipeline::{EngineEvent, EngineSnapshot, PipelineStats, StreamPipeline};
use crate::registry::FieldRegistry;
use crate::thinking::ThinkingDetector;

/// Called after the consumer edits a rendered field.
pub type EditHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct StreamEngine {
    instance_id: Uuid,
    transport: Arc<dyn StreamTransport>,
    snapshots: Arc<dyn SnapshotSource>,
    registry: Arc<FieldRegistry>,
    config: EngineConfig,
    extractor: Arc<dyn ValueExtractor>,
    edit_hook: Option<EditHook>,
    active: Option<ActiveSession>,
}

impl StreamEngine {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        snapshots: Arc<dyn SnapshotSource>,
        registry: Arc<FieldRegistry>,
    ) -> Self {
        let config = EngineConfig::default();
        Self {
            instance_id: Uuid::new_v4(),
            transport,
            snapshots,
            registry,
            extractor: default_extractor(&config),
            config,
            edit_hook: None,
            active: None,
        }
    }

    /// Replaces the extractor with one that honours the configured markers,
    /// so call [`with_extractor`](Self::with_extractor) afterwards.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.extractor = default_extractor(&config);
        self.config = config;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ValueExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_edit_hook(mut self, hook: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.edit_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_instance_id(mut self, instance_id: Uuid) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start streaming `job_id`. A session that is still running is stopped
    /// first, and its transport is closed before the new one opens.
    pub async fn start(&mut self, job_id: &str) -> SessionHandle {
        self.stop().await;

        let pipeline = StreamPipeline::with_extractor(
            self.registry.clone(),
            &self.config,
            self.extractor.clone(),
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(pipeline.snapshot());
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(16);
        let stats = Arc::new(Mutex::new(PipelineStats::default()));
        let cancel = CancellationToken::new();

        let session = Session {
            job_id: job_id.to_string(),
            pipeline,
            window: self.config.coalesce_window(),
            snapshot_tx,
            event_tx,
            commands: command_rx,
            cancel: cancel.clone(),
            snapshots: self.snapshots.clone(),
            edit_hook: self.edit_hook.clone(),
            stats: stats.clone(),
            dropped_events: 0,
        };

        let span = info_span!("session", instance = %self.instance_id, job = %job_id);
        info!(parent: &span, "Starting session on {} transport", self.transport.name());
        let task = tokio::spawn(session.run(self.transport.clone()).instrument(span));

        self.active = Some(ActiveSession {
            cancel: cancel.clone(),
            task,
        });

        SessionHandle {
            job_id: job_id.to_string(),
            snapshots: snapshot_rx,
            events: Some(event_rx),
            commands: command_tx,
            cancel,
            stats,
        }
    }

    /// Cancel the running session, if any, and wait for its task to end.
    pub async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if let Err(e) = active.task.await {
                if !e.is_cancelled() {
                    error!("Session task ended abnormally: {}", e);
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

fn default_extractor(config: &EngineConfig) -> Arc<dyn ValueExtractor> {
    Arc::new(TolerantExtractor::new().with_thinking(ThinkingDetector::from_config(&config.thinking)))
}

enum Command {
    Edit {
        path: String,
        value: Value,
        reply: oneshot::Sender<bool>,
    },
}

/// Consumer side of one session. Dropping it cancels the session.
pub struct SessionHandle {
    job_id: String,
    snapshots: watch::Receiver<EngineSnapshot>,
    events: Option<mpsc::Receiver<EngineEvent>>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    stats: Arc<Mutex<PipelineStats>>,
}

impl SessionHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that sees the current snapshot and every later change.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot_stream(&self) -> WatchStream<EngineSnapshot> {
        WatchStream::new(self.snapshots.clone())
    }

    /// The fine-grained event channel. Only one consumer may take it; events
    /// are dropped while nobody reads and the buffer is full.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.events.take()
    }

    pub fn stats(&self) -> PipelineStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Replace the value of the field rendered at `path`.
    ///
    /// Returns `Ok(false)` when no field is rendered there.
    pub async fn edit_field(&self, path: &str, value: Value) -> Result<bool, EngineError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Edit {
                path: path.to_string(),
                value,
                reply,
            })
            .await
            .map_err(|_| EngineError::SessionClosed)?;
        answer.await.map_err(|_| EngineError::SessionClosed)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for `completed` or `error`.
    ///
    /// Fails with [`EngineError::SessionClosed`] when the session is
    /// cancelled first; [`snapshot`](Self::snapshot) still returns the last
    /// state in that case.
    pub async fn wait_until_settled(&mut self) -> Result<EngineSnapshot, EngineError> {
        let settled = self
            .snapshots
            .wait_for(|snapshot| snapshot.status.is_terminal())
            .await
            .map_err(|_| EngineError::SessionClosed)?;
        Ok(settled.clone())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum StreamEnd {
    Settled,
    Cancelled,
    Broken(TransportError),
}

struct Session {
    job_id: String,
    pipeline: StreamPipeline,
    window: Duration,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    event_tx: mpsc::Sender<EngineEvent>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    snapshots: Arc<dyn SnapshotSource>,
    edit_hook: Option<EditHook>,
    stats: Arc<Mutex<PipelineStats>>,
    dropped_events: usize,
}

impl Session {
    async fn run(mut self, transport: Arc<dyn StreamTransport>) {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Cancelled before the transport opened");
                return;
            }
            opened = transport.open(&self.job_id) => opened,
        };

        let end = match opened {
            Ok(stream) => self.drive(stream).await,
            Err(e) => StreamEnd::Broken(e),
        };

        match end {
            StreamEnd::Cancelled => {
                debug!("Session cancelled");
                return;
            }
            StreamEnd::Settled => {}
            StreamEnd::Broken(e) => {
                warn!("Live transport failed: {}", e);
                if !self.fall_back(e).await {
                    return;
                }
            }
        }

        info!("Session settled as {}", self.pipeline.status());
        if self.dropped_events > 0 {
            warn!("{} engine events dropped on a full channel", self.dropped_events);
        }
        self.serve_edits().await;
    }

    /// Process deliveries until the pipeline settles, the transport breaks
    /// or the session is cancelled.
    async fn drive(&mut self, mut stream: ByteStream) -> StreamEnd {
        let mut decoder = FrameDecoder::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                Some(command) = self.commands.recv() => self.handle_command(command),
                delivery = stream.next() => match delivery {
                    Some(Ok(bytes)) => {
                        trace!("Delivery of {} bytes", bytes.len());
                        for frame in decoder.push(&bytes) {
                            let events = self.pipeline.handle_frame(frame);
                            self.dispatch(events);
                            if self.pipeline.is_terminal() {
                                break;
                            }
                        }
                        if self.pipeline.has_pending() {
                            if self.window.is_zero() {
                                let events = self.pipeline.flush();
                                self.dispatch(events);
                            } else if deadline.is_none() {
                                deadline = Some(Instant::now() + self.window);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        self.flush();
                        return StreamEnd::Broken(e);
                    }
                    None => {
                        for frame in decoder.finish() {
                            let events = self.pipeline.handle_frame(frame);
                            self.dispatch(events);
                        }
                        if !self.pipeline.is_terminal() {
                            self.flush();
                            return StreamEnd::Broken(TransportError::Stream(
                                "stream ended without a completion frame".to_string(),
                            ));
                        }
                    }
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    deadline = None;
                    self.flush();
                }
            }

            self.publish();
            if self.pipeline.is_terminal() {
                debug!(
                    "Stream settled after {} frames ({} skipped)",
                    decoder.decoded_frames(),
                    decoder.skipped_lines()
                );
                return StreamEnd::Settled;
            }
        }
    }

    /// One snapshot lookup. Returns false when cancelled.
    async fn fall_back(&mut self, cause: TransportError) -> bool {
        let cause = EngineError::Transport(cause);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            result = resume_from_snapshot(self.snapshots.as_ref(), &self.job_id) => result,
        };

        let events = match result {
            Ok(content) => self.pipeline.apply_snapshot_content(content),
            Err(e) => {
                error!("Fallback for job {} failed: {}", self.job_id, e);
                self.pipeline
                    .fail(format!("connection lost ({}) and {}", cause, e))
            }
        };
        self.dispatch(events);
        self.publish();
        true
    }

    /// Keep applying consumer edits until the session is cancelled or the
    /// handle goes away.
    async fn serve_edits(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => return,
                },
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Edit { path, value, reply } => {
                let applied = self.pipeline.edit_field(&path, value.clone());
                if applied {
                    debug!("Consumer edited {}", path);
                    if let Some(hook) = &self.edit_hook {
                        hook(&path, &value);
                    }
                } else {
                    warn!("Ignoring edit of {}: no field rendered there", path);
                }
                // Publish before answering so the caller sees its own edit.
                self.publish();
                let _ = reply.send(applied);
            }
        }
    }

    fn flush(&mut self) {
        let events = self.pipeline.flush();
        self.dispatch(events);
    }

    fn dispatch(&mut self, events: Vec<EngineEvent>) {
        for event in events {
            match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if self.dropped_events == 0 {
                        warn!("Engine event channel is full, dropping events until the consumer catches up");
                    }
                    self.dropped_events += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Stats are stored before the snapshot goes out, so a consumer woken
    /// by the snapshot reads matching counters.
    fn publish(&mut self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = PipelineStats {
                dropped_events: self.dropped_events,
                ..self.pipeline.stats()
            };
        }
        let snapshot = self.pipeline.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
