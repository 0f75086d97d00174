use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::pipeline::{EngineSnapshot, PipelineStats};
use crate::status::SessionStatus;

/// Outcome of a finished (or abandoned) session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub job_id: String,
    pub status: SessionStatus,
    pub fields: usize,
    pub groups: usize,
    pub error: Option<String>,
    pub stats: PipelineStats,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl SessionSummary {
    pub fn new(job_id: impl Into<String>, snapshot: &EngineSnapshot, stats: PipelineStats, elapsed: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            status: snapshot.status,
            fields: snapshot.fields().len(),
            groups: snapshot.group_count(),
            error: snapshot.error_message.clone(),
            stats,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Share of parsed field events that matched a registered field.
    pub fn match_rate(&self) -> f64 {
        if self.stats.field_events == 0 {
            return 0.0;
        }
        let matched = self.stats.field_events.saturating_sub(self.stats.unmatched_events);
        matched as f64 / self.stats.field_events as f64
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} field(s) in {} group(s), {} delta(s), {} parse(s)",
            self.job_id, self.status, self.fields, self.groups, self.stats.deltas, self.stats.parses
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}
