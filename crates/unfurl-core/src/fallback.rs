//! Resume from the job store after the live stream fails.

use serde_json::Value;
use tracing::{debug, info, warn};
use unfurl_providers::{JobSnapshot, SnapshotSource};

use crate::error::EngineError;

/// Content a completed snapshot stands for, in the same text form the live
/// stream would have produced.
///
/// A single string result is used as is; any other single result is
/// serialized; several results become one array document.
pub fn snapshot_content(snapshot: &JobSnapshot) -> Option<String> {
    let results = snapshot.results.as_ref()?;
    match results.as_slice() {
        [] => None,
        [only] => Some(match &only.data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }),
        many => {
            let items: Vec<Value> = many.iter().map(|r| r.data.clone()).collect();
            Some(Value::Array(items).to_string())
        }
    }
}

/// Fetch the job's last known state once.
///
/// `Ok(content)` means the job completed; the content may be absent when the
/// job finished without results. A job that is still running, or a fetch
/// that fails, is an error. There is no retry.
pub async fn resume_from_snapshot(
    source: &dyn SnapshotSource,
    job_id: &str,
) -> Result<Option<String>, EngineError> {
    debug!("Fetching snapshot for job {}", job_id);
    let snapshot = source.fetch_snapshot(job_id).await.map_err(|e| {
        warn!("Snapshot fetch for job {} failed: {}", job_id, e);
        EngineError::FallbackFailed(e.to_string())
    })?;

    if !snapshot.is_completed() {
        return Err(EngineError::FallbackIncomplete {
            status: snapshot.status,
            error: snapshot.error,
        });
    }

    let content = snapshot_content(&snapshot);
    info!(
        "Resumed job {} from snapshot ({} bytes)",
        job_id,
        content.as_ref().map_or(0, String::len)
    );
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unfurl_providers::{JobResult, StaticSnapshotSource};

    fn result(data: Value) -> JobResult {
        JobResult { data }
    }

    #[test]
    fn test_snapshot_content_normalization() {
        let text = JobSnapshot::completed(vec![result(json!("{\"title\": \"X\"}"))]);
        assert_eq!(snapshot_content(&text).as_deref(), Some("{\"title\": \"X\"}"));

        let object = JobSnapshot::completed(vec![result(json!({"title": "X"}))]);
        assert_eq!(snapshot_content(&object).as_deref(), Some(r#"{"title":"X"}"#));

        let many = JobSnapshot::completed(vec![result(json!(1)), result(json!({"a": 2}))]);
        assert_eq!(snapshot_content(&many).as_deref(), Some(r#"[1,{"a":2}]"#));

        assert_eq!(snapshot_content(&JobSnapshot::completed(vec![])), None);
    }

    #[tokio::test]
    async fn test_running_job_is_an_error() {
        let source = StaticSnapshotSource::new(JobSnapshot {
            status: "running".to_string(),
            results: None,
            error: None,
        });
        let err = resume_from_snapshot(&source, "job-1").await.unwrap_err();
        assert!(matches!(err, EngineError::FallbackIncomplete { ref status, .. } if status == "running"));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch() {
        let source = StaticSnapshotSource::failing("store unavailable");
        let err = resume_from_snapshot(&source, "job-1").await.unwrap_err();
        assert!(matches!(err, EngineError::FallbackFailed(ref m) if m.contains("store unavailable")));
    }

    #[tokio::test]
    async fn test_completed_job() {
        let source = StaticSnapshotSource::new(JobSnapshot::completed(vec![result(json!({"title": "X"}))]));
        let content = resume_from_snapshot(&source, "job-1").await.unwrap();
        assert_eq!(content.as_deref(), Some(r#"{"title":"X"}"#));
    }
}
