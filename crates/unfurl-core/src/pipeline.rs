//! The synchronous per-session pipeline.
//!
//! Frames go in one at a time; each is fully processed before the next.
//! Text deltas only grow the content and mark it dirty; the expensive
//! extract and diff step runs on [`StreamPipeline::flush`], which the
//! engine schedules after its coalescing window.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use unfurl_providers::{Frame, ReasoningKind};

use crate::accumulator::ContentAccumulator;
use crate::config::EngineConfig;
use crate::differ::{FieldEvent, PathDiffer};
use crate::error::EngineError;
use crate::extractor::{TolerantExtractor, ValueExtractor};
use crate::reconciler::{Reconciler, RenderedField, ViewItem};
use crate::registry::FieldRegistry;
use crate::status::{SessionSignal, SessionState, SessionStatus};
use crate::thinking::{ThinkingDetector, ThinkingTransition};

/// Fine-grained notifications, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Field(FieldEvent),
    ThinkingStarted,
    ThinkingEnded,
    Status { status: SessionStatus },
}

/// What the consumer sees.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub status: SessionStatus,
    pub items: Vec<ViewItem>,
    pub is_thinking: bool,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EngineSnapshot {
    /// Every rendered field, in display order.
    pub fn fields(&self) -> Vec<&RenderedField> {
        self.items.iter().flat_map(ViewItem::fields).collect()
    }

    pub fn field(&self, path: &str) -> Option<&RenderedField> {
        self.fields().into_iter().find(|f| f.path == path)
    }

    pub fn group_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, ViewItem::Group { .. }))
            .count()
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineStats {
    pub frames: usize,
    pub deltas: usize,
    pub parses: usize,
    pub field_events: usize,
    pub unmatched_events: usize,
    /// Engine events lost because the consumer fell behind.
    pub dropped_events: usize,
}

pub struct StreamPipeline {
    accumulator: ContentAccumulator,
    detector: ThinkingDetector,
    extractor: Arc<dyn ValueExtractor>,
    differ: PathDiffer,
    reconciler: Reconciler,
    state: SessionState,
    dirty: bool,
    stats: PipelineStats,
}

impl StreamPipeline {
    pub fn new(registry: Arc<FieldRegistry>, config: &EngineConfig) -> Self {
        let detector = ThinkingDetector::from_config(&config.thinking);
        let extractor = Arc::new(TolerantExtractor::new().with_thinking(detector.clone()));
        Self::with_extractor(registry, config, extractor)
    }

    pub fn with_extractor(
        registry: Arc<FieldRegistry>,
        config: &EngineConfig,
        extractor: Arc<dyn ValueExtractor>,
    ) -> Self {
        Self {
            accumulator: ContentAccumulator::new(),
            detector: ThinkingDetector::from_config(&config.thinking),
            extractor,
            differ: PathDiffer::new(),
            reconciler: Reconciler::new(registry),
            state: SessionState::new(config.thinking.mode),
            dirty: false,
            stats: PipelineStats::default(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Content arrived that has not been parsed yet.
    pub fn has_pending(&self) -> bool {
        self.dirty
    }

    pub fn content(&self) -> &str {
        self.accumulator.current()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            unmatched_events: self.reconciler.unmatched_events(),
            ..self.stats
        }
    }

    /// Apply one frame without parsing. Frames after a terminal state are
    /// ignored.
    pub fn handle_frame(&mut self, frame: Frame) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if self.is_terminal() {
            debug!("Ignoring frame after session end");
            return events;
        }
        self.stats.frames += 1;

        match frame {
            Frame::TextDelta(delta) => {
                self.accumulator.push(&delta);
                self.stats.deltas += 1;
                self.dirty = true;
                self.signal(SessionSignal::Content, &mut events);

                let transitions = self
                    .detector
                    .detect(self.accumulator.current(), self.accumulator.previous());
                for transition in transitions {
                    self.thinking(transition, &mut events);
                }
            }
            Frame::Completion(metadata) => {
                debug!("Completion frame: {}", metadata);
                self.flush_into(&mut events);
                self.signal(SessionSignal::Completed, &mut events);
            }
            Frame::Error { message } => {
                let error = EngineError::Application(message);
                warn!("Application error from stream: {}", error);
                self.flush_into(&mut events);
                self.signal(SessionSignal::Failed(error.to_string()), &mut events);
            }
            Frame::Connected => self.signal(SessionSignal::Connected, &mut events),
            Frame::Reasoning(notice) => {
                let transition = match notice.kind {
                    ReasoningKind::Start => ThinkingTransition::Started,
                    ReasoningKind::End => ThinkingTransition::Ended,
                };
                self.thinking(transition, &mut events);
            }
            Frame::Status(message) => debug!("Side-channel message: {}", message),
        }

        events
    }

    /// Parse pending content and fold the resulting field events into the
    /// view.
    pub fn flush(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.flush_into(&mut events);
        events
    }

    /// [`handle_frame`](Self::handle_frame) followed by [`flush`](Self::flush).
    pub fn process_frame(&mut self, frame: Frame) -> Vec<EngineEvent> {
        let mut events = self.handle_frame(frame);
        self.flush_into(&mut events);
        events
    }

    /// Replace the content with a completed job's stored result, parse it
    /// and complete the session.
    pub fn apply_snapshot_content(&mut self, content: Option<String>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if self.is_terminal() {
            return events;
        }
        if let Some(content) = content {
            self.accumulator.replace(content);
            self.dirty = true;
        }
        self.flush_into(&mut events);
        self.signal(SessionSignal::Completed, &mut events);
        events
    }

    /// End the session with an error.
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.signal(SessionSignal::Failed(message.into()), &mut events);
        events
    }

    /// Consumer edit of a rendered field. Returns false when no field is
    /// rendered at `path`.
    pub fn edit_field(&mut self, path: &str, value: Value) -> bool {
        self.reconciler.edit(path, value)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let error_message = self.state.error().map(str::to_string);
        EngineSnapshot {
            status: self.state.status(),
            items: self.reconciler.view(),
            is_thinking: self.state.is_thinking(),
            has_error: error_message.is_some(),
            error_message,
        }
    }

    fn flush_into(&mut self, events: &mut Vec<EngineEvent>) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.stats.parses += 1;

        let tree = self.extractor.extract(self.accumulator.current());
        for event in self.differ.diff(&tree) {
            self.reconciler.apply(&event);
            self.stats.field_events += 1;
            events.push(EngineEvent::Field(event));
        }
    }

    fn thinking(&mut self, transition: ThinkingTransition, events: &mut Vec<EngineEvent>) {
        let (signal, event) = match transition {
            ThinkingTransition::Started => (SessionSignal::ThinkingStarted, EngineEvent::ThinkingStarted),
            ThinkingTransition::Ended => (SessionSignal::ThinkingEnded, EngineEvent::ThinkingEnded),
        };
        let was_thinking = self.state.is_thinking();
        self.signal(signal, events);
        if was_thinking != self.state.is_thinking() {
            info!("Thinking phase {}", if was_thinking { "ended" } else { "started" });
            events.push(event);
        }
    }

    fn signal(&mut self, signal: SessionSignal, events: &mut Vec<EngineEvent>) {
        let before = self.state.status();
        if self.state.apply(signal) && self.state.status() != before {
            events.push(EngineEvent::Status {
                status: self.state.status(),
            });
        }
    }
}
