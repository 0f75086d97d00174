//! In-band reasoning markers.
//!
//! Models may wrap a reasoning segment in a marker pair (`<think>` ...
//! `</think>` by default). Detection is plain text matching on the
//! accumulated content; the markers need not sit inside valid JSON.

use std::borrow::Cow;

use crate::config::ThinkingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingTransition {
    Started,
    Ended,
}

#[derive(Debug, Clone)]
pub struct ThinkingDetector {
    start_marker: String,
    end_marker: String,
}

impl ThinkingDetector {
    pub fn new(start_marker: impl Into<String>, end_marker: impl Into<String>) -> Self {
        Self {
            start_marker: start_marker.into(),
            end_marker: end_marker.into(),
        }
    }

    pub fn from_config(config: &ThinkingConfig) -> Self {
        Self::new(config.start_marker.clone(), config.end_marker.clone())
    }

    /// Report the markers that appear in `current` but not in `previous`.
    ///
    /// A start always precedes an end when both appear in the same update.
    pub fn detect(&self, current: &str, previous: &str) -> Vec<ThinkingTransition> {
        let mut transitions = Vec::new();
        if current.contains(&self.start_marker) && !previous.contains(&self.start_marker) {
            transitions.push(ThinkingTransition::Started);
        }
        if current.contains(&self.end_marker) && !previous.contains(&self.end_marker) {
            transitions.push(ThinkingTransition::Ended);
        }
        transitions
    }

    /// True while a start marker has been seen without a matching end.
    pub fn is_open(&self, text: &str) -> bool {
        match text.rfind(&self.start_marker) {
            Some(start) => !text[start..].contains(&self.end_marker),
            None => false,
        }
    }

    /// Remove every marker-delimited segment, markers included.
    ///
    /// An unterminated trailing segment is cut off entirely.
    pub fn strip<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !text.contains(&self.start_marker) {
            return Cow::Borrowed(text);
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(&self.start_marker) {
            out.push_str(&rest[..start]);
            let after_start = &rest[start + self.start_marker.len()..];
            match after_start.find(&self.end_marker) {
                Some(end) => rest = &after_start[end + self.end_marker.len()..],
                None => {
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        Cow::Owned(out)
    }
}

impl Default for ThinkingDetector {
    fn default() -> Self {
        Self::from_config(&ThinkingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_start_then_end() {
        let detector = ThinkingDetector::default();
        assert_eq!(
            detector.detect("<think>planning", ""),
            vec![ThinkingTransition::Started]
        );
        assert!(detector
            .detect("<think>planning more", "<think>planning")
            .is_empty());
        assert_eq!(
            detector.detect("<think>planning</think>{", "<think>planning"),
            vec![ThinkingTransition::Ended]
        );
    }

    #[test]
    fn test_both_markers_in_one_update() {
        let detector = ThinkingDetector::default();
        assert_eq!(
            detector.detect("<think>x</think>", ""),
            vec![ThinkingTransition::Started, ThinkingTransition::Ended]
        );
    }

    #[test]
    fn test_is_open() {
        let detector = ThinkingDetector::default();
        assert!(!detector.is_open("{\"a\":1}"));
        assert!(detector.is_open("<think>hmm"));
        assert!(!detector.is_open("<think>hmm</think>{"));
    }

    #[test]
    fn test_strip_segments() {
        let detector = ThinkingDetector::default();
        assert_eq!(detector.strip("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(
            detector.strip("<think>{\"draft\":1}</think>{\"a\":1}"),
            "{\"a\":1}"
        );
        assert_eq!(detector.strip("{\"a\":1}<think>still going"), "{\"a\":1}");
    }
}
