//! Tests for the in-memory transports
//!
//! What these tests protect:
//! - Recorded frame logs replay line by line and decode to the same frames
//! - Scripted failures surface as transport errors, not frames
//! - Dropping the stream stops the replay
//! - Snapshot sources count their fetches
//!
//! What these tests intentionally do NOT assert:
//! - Exact timing of paced deliveries

use bytes::Bytes;
use futures_util::StreamExt;
use std::io::Write;
use std::time::Duration;
use unfurl_providers::{
    Frame, FrameDecoder, JobSnapshot, ReplayStep, ReplayTransport, SnapshotSource,
    StaticSnapshotSource, StreamTransport, TransportError,
};

async fn collect_frames(transport: &ReplayTransport) -> (Vec<Frame>, Option<TransportError>) {
    let mut stream = transport.open("job").await.unwrap();
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    while let Some(delivery) = stream.next().await {
        match delivery {
            Ok(bytes) => frames.extend(decoder.push(&bytes)),
            Err(e) => return (frames, Some(e)),
        }
    }
    frames.extend(decoder.finish());
    (frames, None)
}

// =============================================================================
// Replay
// =============================================================================

mod replay {
    use super::*;

    #[tokio::test]
    async fn recorded_log_replays_every_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"type\":\"connected\"}}").unwrap();
        writeln!(file, "0:\"{{\\\"a\\\":\"").unwrap();
        writeln!(file, "0:\"1}}\"").unwrap();
        write!(file, "e:{{\"finishReason\":\"stop\"}}").unwrap();

        let transport = ReplayTransport::from_file(file.path()).unwrap();
        let (frames, error) = collect_frames(&transport).await;

        assert!(error.is_none());
        assert_eq!(
            frames,
            vec![
                Frame::Connected,
                Frame::TextDelta("{\"a\":".to_string()),
                Frame::TextDelta("1}".to_string()),
                Frame::Completion(serde_json::json!({"finishReason": "stop"})),
            ]
        );
        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.delivered_count(), 4);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReplayTransport::from_file(dir.path().join("missing.log"));
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn scripted_failure_ends_the_stream() {
        let transport = ReplayTransport::from_text("0:\"x\"")
            .then(ReplayStep::Fail("reset by peer".to_string()))
            .then(ReplayStep::Deliver(Bytes::from_static(b"0:\"never\"\n")));
        let (frames, error) = collect_frames(&transport).await;

        assert_eq!(frames, vec![Frame::TextDelta("x".to_string())]);
        assert!(matches!(error, Some(TransportError::Stream(ref m)) if m == "reset by peer"));
    }

    #[tokio::test]
    async fn refusing_transport_never_opens() {
        let transport = ReplayTransport::refusing("no route");
        let result = transport.open("job-9").await;
        assert!(matches!(result, Err(TransportError::Connect { ref url, .. }) if url == "replay://job-9"));
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_delivery() {
        let transport = ReplayTransport::from_text("0:\"a\"\n0:\"b\"\n0:\"c\"")
            .with_pacing(Duration::from_millis(20));
        let mut stream = transport.open("job").await.unwrap();
        assert!(stream.next().await.is_some());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transport.delivered_count() < 3);
    }

    #[tokio::test]
    async fn every_open_replays_from_the_start() {
        let transport = ReplayTransport::from_text("0:\"a\"\ne:{}");
        let (first, _) = collect_frames(&transport).await;
        let (second, _) = collect_frames(&transport).await;
        assert_eq!(first, second);
        assert_eq!(transport.open_count(), 2);
    }
}

// =============================================================================
// Snapshot source
// =============================================================================

mod snapshots {
    use super::*;

    #[tokio::test]
    async fn static_source_answers_every_fetch() {
        let source = StaticSnapshotSource::new(JobSnapshot::completed(vec![]));
        assert!(source.fetch_snapshot("a").await.unwrap().is_completed());
        assert!(source.fetch_snapshot("b").await.unwrap().is_completed());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn failing_source_reports_connect_error() {
        let source = StaticSnapshotSource::failing("store down");
        let err = source.fetch_snapshot("a").await.unwrap_err();
        assert!(err.to_string().contains("store down"));
    }
}
