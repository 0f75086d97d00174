//! Line-oriented wire framing.
//!
//! The generation service streams newline-delimited frames:
//!
//! - `0:<json-string>`  text delta appended to the accumulated content
//! - `e:<json-object>`  stream completion (presence is the completion signal)
//! - `error:<json-object>` terminal application error
//! - anything else is tried as a bare JSON side-channel message
//!
//! A delivery from the transport may hold several frames, or only part of
//! one. [`FrameDecoder`] buffers partial lines across deliveries and never
//! lets one bad line stop the lines that follow it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const TEXT_DELTA_PREFIX: &str = "0:";
const COMPLETION_PREFIX: &str = "e:";
const ERROR_PREFIX: &str = "error:";

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Text to append to the accumulated content.
    TextDelta(String),
    /// Completion metadata. Only the presence of the frame matters.
    Completion(Value),
    /// In-band application error. Always terminal.
    Error { message: String },
    /// The server acknowledged the connection.
    Connected,
    /// Reasoning phase notification sent out of band.
    Reasoning(ReasoningNotice),
    /// Any other side-channel JSON message.
    Status(Value),
}

impl Frame {
    /// True for frames after which no further content is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Completion(_) | Frame::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasoningKind {
    #[serde(rename = "reasoning_start")]
    Start,
    #[serde(rename = "reasoning_end")]
    End,
}

/// Side-channel reasoning notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningNotice {
    #[serde(rename = "eventType", default)]
    pub event_type: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReasoningKind,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(rename = "modelName", default)]
    pub model_name: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("text delta payload is not a JSON string: {0}")]
    InvalidDelta(String),
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode one line. Blank lines decode to `Ok(None)`.
pub fn decode_line(line: &str) -> Result<Option<Frame>, FrameError> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Ok(None);
    }

    if let Some(payload) = line.strip_prefix(TEXT_DELTA_PREFIX) {
        return serde_json::from_str::<String>(payload)
            .map(|text| Some(Frame::TextDelta(text)))
            .map_err(|e| FrameError::InvalidDelta(e.to_string()));
    }

    if let Some(payload) = line.strip_prefix(COMPLETION_PREFIX) {
        let metadata = match serde_json::from_str::<Value>(payload) {
            Ok(value) => value,
            Err(e) => {
                // The frame still completes the stream; only the metadata is lost.
                warn!("Completion frame carried unreadable metadata: {}", e);
                Value::Null
            }
        };
        return Ok(Some(Frame::Completion(metadata)));
    }

    if let Some(payload) = line.strip_prefix(ERROR_PREFIX) {
        return Ok(Some(Frame::Error {
            message: error_message(payload),
        }));
    }

    let value: Value =
        serde_json::from_str(line).map_err(|_| FrameError::Unrecognized(preview(line)))?;
    Ok(Some(classify_side_channel(value)))
}

fn error_message(payload: &str) -> String {
    match serde_json::from_str::<ErrorPayload>(payload) {
        Ok(ErrorPayload {
            error: Some(Value::String(message)),
            ..
        }) => message,
        Ok(ErrorPayload {
            error: Some(Value::Object(inner)),
            ..
        }) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(inner.clone()).to_string()),
        Ok(ErrorPayload {
            message: Some(message),
            ..
        }) => message,
        _ => payload.trim().to_string(),
    }
}

fn classify_side_channel(value: Value) -> Frame {
    let kind = value.get("type").and_then(Value::as_str);
    match kind {
        Some("connected") => Frame::Connected,
        Some("reasoning_start") | Some("reasoning_end") => {
            match serde_json::from_value::<ReasoningNotice>(value.clone()) {
                Ok(notice) => Frame::Reasoning(notice),
                Err(e) => {
                    debug!("Reasoning notification did not match expected shape: {}", e);
                    Frame::Status(value)
                }
            }
        }
        _ => Frame::Status(value),
    }
}

fn preview(line: &str) -> String {
    const MAX: usize = 80;
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let head: String = line.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

/// Incremental decoder for raw transport deliveries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    decoded: usize,
    skipped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delivery and return every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let buffer = std::mem::take(&mut self.buffer);

        let mut frames = Vec::new();
        let mut line_start = 0;
        let mut scan_from = self.scanned;
        while let Some(offset) = buffer[scan_from..].iter().position(|b| *b == b'\n') {
            let line_end = scan_from + offset;
            self.decode_into(&buffer[line_start..line_end], &mut frames);
            line_start = line_end + 1;
            scan_from = line_start;
        }

        self.buffer = buffer;
        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();
        frames
    }

    /// Flush an unterminated trailing line once the transport has ended.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            self.decode_into(&line, &mut frames);
        }
        frames
    }

    /// Number of frames successfully decoded so far.
    pub fn decoded_frames(&self) -> usize {
        self.decoded
    }

    /// Number of lines dropped because they could not be decoded.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    fn decode_into(&mut self, raw: &[u8], frames: &mut Vec<Frame>) {
        let result = std::str::from_utf8(raw)
            .map_err(|_| FrameError::InvalidUtf8)
            .and_then(decode_line);

        match result {
            Ok(Some(frame)) => {
                self.decoded += 1;
                frames.push(frame);
            }
            Ok(None) => {}
            Err(e) => {
                self.skipped += 1;
                warn!("Skipping malformed frame: {}", e);
            }
        }
    }
}

/// Decode a complete delivery in one go.
pub fn decode_delivery(text: &str) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.push(text.as_bytes());
    frames.extend(decoder.finish());
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_delta_unescapes_payload() {
        let frame = decode_line(r#"0:"line one\nsays \"hi\"""#).unwrap();
        assert_eq!(
            frame,
            Some(Frame::TextDelta("line one\nsays \"hi\"".to_string()))
        );
    }

    #[test]
    fn test_completion_and_error_frames() {
        assert_eq!(
            decode_line(r#"e:{"finishReason":"stop"}"#).unwrap(),
            Some(Frame::Completion(json!({"finishReason": "stop"})))
        );
        assert_eq!(
            decode_line("e:not json").unwrap(),
            Some(Frame::Completion(Value::Null))
        );
        assert_eq!(
            decode_line(r#"error:{"error":"quota exceeded"}"#).unwrap(),
            Some(Frame::Error {
                message: "quota exceeded".to_string()
            })
        );
        assert_eq!(
            decode_line(r#"error:{"error":{"message":"boom"}}"#).unwrap(),
            Some(Frame::Error {
                message: "boom".to_string()
            })
        );
    }

    #[test]
    fn test_side_channel_messages() {
        assert_eq!(
            decode_line(r#"{"type":"connected"}"#).unwrap(),
            Some(Frame::Connected)
        );

        let reasoning = decode_line(
            r#"{"eventType":"thinking","type":"reasoning_start","phase":"plan","timestamp":1700000000,"modelName":"m1"}"#,
        )
        .unwrap();
        match reasoning {
            Some(Frame::Reasoning(notice)) => {
                assert_eq!(notice.kind, ReasoningKind::Start);
                assert_eq!(notice.model_name.as_deref(), Some("m1"));
            }
            other => panic!("expected reasoning frame, got {:?}", other),
        }

        assert_eq!(
            decode_line(r#"{"type":"progress","pct":40}"#).unwrap(),
            Some(Frame::Status(json!({"type": "progress", "pct": 40})))
        );
    }

    #[test]
    fn test_malformed_line_does_not_stop_delivery() {
        let frames = decode_delivery("0:\"ok\"\n0:{broken\n\n0:\"still here\"\n");
        assert_eq!(
            frames,
            vec![
                Frame::TextDelta("ok".to_string()),
                Frame::TextDelta("still here".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_split_across_deliveries() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"0:\"hel").is_empty());
        assert_eq!(
            decoder.push(b"lo\"\n0:\"x\""),
            vec![Frame::TextDelta("hello".to_string())]
        );
        assert_eq!(decoder.finish(), vec![Frame::TextDelta("x".to_string())]);
        assert_eq!(decoder.decoded_frames(), 2);
    }

    #[test]
    fn test_multibyte_character_split_across_deliveries() {
        let line = "0:\"caf\u{e9}\"\n".as_bytes().to_vec();
        let split = line.len() - 3;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(
            decoder.push(&line[split..]),
            vec![Frame::TextDelta("caf\u{e9}".to_string())]
        );
        assert_eq!(decoder.skipped_lines(), 0);
    }

    #[test]
    fn test_crlf_line_endings() {
        let frames = decode_delivery("0:\"a\"\r\ne:{}\r\n");
        assert_eq!(
            frames,
            vec![Frame::TextDelta("a".to_string()), Frame::Completion(json!({}))]
        );
        assert!(frames[1].is_terminal());
    }

    #[test]
    fn test_long_line_in_small_chunks_is_scanned_once() {
        let payload = "x".repeat(4_000);
        let line = format!("0:\"{}\"\n", payload);
        let mut decoder = FrameDecoder::new();

        let mut frames = Vec::new();
        for chunk in line.as_bytes().chunks(7) {
            frames.extend(decoder.push(chunk));
            assert_eq!(decoder.scanned, decoder.buffer.len());
        }

        assert_eq!(frames, vec![Frame::TextDelta(payload)]);
        assert!(decoder.buffer.is_empty());
    }
}
