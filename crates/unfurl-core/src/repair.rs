//! Repair of malformed model JSON.
//!
//! Closes truncated strings, objects and arrays, drops trailing commas and
//! skips any prose or code fence in front of the document.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::extractor::{TolerantExtractor, ValueExtractor};
use crate::partial_json::document_start;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("no JSON document found in input")]
    NothingRecovered,

    #[error("failed to serialize repaired document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Output layout of a repaired document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairFormat {
    /// Spaces per level. Zero writes compact JSON.
    pub indent: usize,
    /// Escape every non-ASCII character as `\uXXXX`.
    pub ensure_ascii: bool,
}

impl Default for RepairFormat {
    fn default() -> Self {
        Self {
            indent: 2,
            ensure_ascii: false,
        }
    }
}

/// Best-effort document in `text`.
pub fn repair_value(text: &str) -> Result<Value, RepairError> {
    let value = TolerantExtractor::new().extract(text);
    let recovered = match &value {
        Value::Object(map) => !map.is_empty() || document_start(text).is_some(),
        _ => true,
    };
    if recovered {
        Ok(value)
    } else {
        Err(RepairError::NothingRecovered)
    }
}

/// Repair `text` and serialize the result.
pub fn repair_json(text: &str, format: RepairFormat) -> Result<String, RepairError> {
    let value = repair_value(text)?;
    render(&value, format)
}

pub fn render(value: &Value, format: RepairFormat) -> Result<String, RepairError> {
    let text = if format.indent == 0 {
        serde_json::to_string(value)?
    } else {
        let indent = " ".repeat(format.indent);
        let mut out = Vec::new();
        let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
        value.serialize(&mut serializer)?;
        String::from_utf8_lossy(&out).into_owned()
    };

    Ok(if format.ensure_ascii {
        escape_non_ascii(&text)
    } else {
        text
    })
}

/// Non-ASCII characters only occur inside string literals of serialized
/// JSON, so escaping them in place keeps the document valid.
fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repairs_truncated_document() {
        let text = "Here you go:\n```json\n{\"title\": \"Gone\", \"tags\": [\"a\", \"b\",";
        assert_eq!(repair_value(text).unwrap(), json!({"title": "Gone", "tags": ["a", "b"]}));
    }

    #[test]
    fn test_indent_and_compact() {
        let value = json!({"a": [1]});
        let pretty = render(&value, RepairFormat { indent: 4, ensure_ascii: false }).unwrap();
        assert_eq!(pretty, "{\n    \"a\": [\n        1\n    ]\n}");
        let compact = render(&value, RepairFormat { indent: 0, ensure_ascii: false }).unwrap();
        assert_eq!(compact, r#"{"a":[1]}"#);
    }

    #[test]
    fn test_ensure_ascii() {
        let value = json!({"name": "李雷 🎬"});
        let plain = render(&value, RepairFormat { indent: 0, ensure_ascii: false }).unwrap();
        assert_eq!(plain, r#"{"name":"李雷 🎬"}"#);

        let ascii = render(&value, RepairFormat { indent: 0, ensure_ascii: true }).unwrap();
        assert_eq!(ascii, r#"{"name":"\u674e\u96f7 \ud83c\udfac"}"#);
        let back: Value = serde_json::from_str(&ascii).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_empty_document_is_recovered() {
        assert_eq!(repair_json("{}", RepairFormat::default()).unwrap(), "{}");
    }

    #[test]
    fn test_nothing_to_repair() {
        assert!(matches!(
            repair_value("just prose"),
            Err(RepairError::NothingRecovered)
        ));
    }
}
