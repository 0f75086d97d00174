//! Incremental structured-output streaming engine.
//!
//! Turns a growing, possibly malformed JSON text stream into field-level
//! events and a stable, ordered view model while the document is still being
//! generated.

pub mod accumulator;
pub mod config;
pub mod differ;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod partial_json;
pub mod pipeline;
pub mod reconciler;
pub mod registry;
pub mod repair;
pub mod scrape;
pub mod status;
pub mod summary;
pub mod thinking;

pub use accumulator::ContentAccumulator;
pub use config::{ConfigError, EngineConfig, ThinkingConfig, ThinkingMode};
pub use differ::{flatten_paths, values_equal, FieldEvent, FieldEventKind, PathDiffer};
pub use engine::{EditHook, SessionHandle, StreamEngine};
pub use error::EngineError;
pub use extractor::{TolerantExtractor, ValueExtractor};
pub use fallback::{resume_from_snapshot, snapshot_content};
pub use partial_json::{parse_partial, PartialParse};
pub use pipeline::{EngineEvent, EngineSnapshot, PipelineStats, StreamPipeline};
pub use reconciler::{Reconciler, RenderedField, ViewItem};
pub use registry::{
    field_id, path_to_id, ContainerKind, FieldDefinition, FieldRegistry, KeyExtractor,
    MatchedPath, RegistryProblem,
};
pub use repair::{repair_json, repair_value, RepairError, RepairFormat};
pub use status::{SessionSignal, SessionState, SessionStatus};
pub use summary::SessionSummary;
pub use thinking::{ThinkingDetector, ThinkingTransition};
