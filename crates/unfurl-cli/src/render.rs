//! Human-readable snapshot output.

use serde_json::Value;
use unfurl_core::{EngineSnapshot, RenderedField, ViewItem};

const MAX_VALUE_CHARS: usize = 72;

pub fn format_snapshot(snapshot: &EngineSnapshot) -> String {
    let mut out = format!("── {}", snapshot.status);
    if snapshot.is_thinking {
        out.push_str(" (thinking)");
    }
    if let Some(error) = &snapshot.error_message {
        out.push_str(&format!(": {}", error));
    }
    out.push('\n');

    for item in &snapshot.items {
        match item {
            ViewItem::Field(field) => out.push_str(&format_field(field, 1)),
            ViewItem::Group { key, members, .. } => {
                out.push_str(&format!("  [{}]\n", key));
                for member in members {
                    out.push_str(&format_field(member, 2));
                }
            }
        }
    }
    out
}

fn format_field(field: &RenderedField, depth: usize) -> String {
    format!(
        "{}{} <{}> {}\n",
        "  ".repeat(depth),
        field.path,
        field.definition.render_kind,
        preview(&field.value)
    )
}

/// Single-line, length-limited rendering of a value.
pub fn preview(value: &Value) -> String {
    let text = match value {
        Value::Object(map) => format!("{{{} keys}}", map.len()),
        Value::Array(items) => format!("[{} items]", items.len()),
        other => other.to_string(),
    };
    let text = text.replace('\n', "\\n");
    if text.chars().count() <= MAX_VALUE_CHARS {
        text
    } else {
        let head: String = text.chars().take(MAX_VALUE_CHARS).collect();
        format!("{}…", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use unfurl_core::{EngineConfig, FieldDefinition, FieldRegistry, StreamPipeline};
    use unfurl_providers::Frame;

    #[test]
    fn test_preview() {
        assert_eq!(preview(&json!("a\nb")), "\"a\\nb\"");
        assert_eq!(preview(&json!({"a": 1, "b": 2})), "{2 keys}");
        assert_eq!(preview(&json!([1, 2, 3])), "[3 items]");
        assert!(preview(&json!("x".repeat(200))).ends_with('…'));
    }

    #[test]
    fn test_format_snapshot() {
        let registry = Arc::new(FieldRegistry::new(vec![
            FieldDefinition::new("title", "heading").order(0),
            FieldDefinition::new("cast[*]", "text").group("cast"),
        ]));
        let mut pipeline = StreamPipeline::new(registry, &EngineConfig::default());
        pipeline.process_frame(Frame::TextDelta(r#"{"title": "T", "cast": ["Ann"]}"#.into()));

        let text = format_snapshot(&pipeline.snapshot());
        assert_eq!(
            text,
            "── streaming\n  title <heading> \"T\"\n  [cast]\n    cast[0] <text> \"Ann\"\n"
        );
    }
}
