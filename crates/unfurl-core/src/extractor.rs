//! Accumulated text to best-effort value tree.
//!
//! [`ValueExtractor`] is the seam between raw text and the path differ: a
//! different streaming JSON parser can be dropped in without touching the
//! rest of the pipeline.

use serde_json::{Map, Value};
use tracing::debug;

use crate::partial_json::{document_start, parse_partial};
use crate::scrape::FieldScraper;
use crate::thinking::ThinkingDetector;

/// Turns accumulated text into a value tree.
///
/// Implementations must be pure: the same input always yields an equal
/// tree, and no input may panic. Text with nothing recognizable yields an
/// empty object.
pub trait ValueExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Value;
}

/// Strict parse, then tolerant prefix parse, then key scraping.
#[derive(Debug, Clone)]
pub struct TolerantExtractor {
    thinking: Option<ThinkingDetector>,
    scraper: FieldScraper,
}

impl TolerantExtractor {
    pub fn new() -> Self {
        Self {
            thinking: None,
            scraper: FieldScraper::standard().clone(),
        }
    }

    /// Ignore text inside thinking segments when locating the document.
    pub fn with_thinking(mut self, detector: ThinkingDetector) -> Self {
        self.thinking = Some(detector);
        self
    }

    pub fn with_scraper(mut self, scraper: FieldScraper) -> Self {
        self.scraper = scraper;
        self
    }
}

impl Default for TolerantExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueExtractor for TolerantExtractor {
    fn extract(&self, text: &str) -> Value {
        let text = match &self.thinking {
            Some(detector) => detector.strip(text),
            None => std::borrow::Cow::Borrowed(text),
        };

        if let Some(start) = document_start(&text) {
            let candidate = strip_closing_fence(&text[start..]);
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return value;
            }
        }

        let parsed = parse_partial(&text);
        let hard_failure = parsed.value.is_none() || (parsed.invalid && parsed.is_empty());
        if hard_failure {
            let scraped = self.scraper.scrape(&text);
            if !scraped.is_empty() {
                return Value::Object(scraped);
            }
            debug!("Nothing recognizable in {} bytes of content", text.len());
        }

        parsed.value.unwrap_or_else(|| Value::Object(Map::new()))
    }
}

fn strip_closing_fence(text: &str) -> &str {
    let trimmed = text.trim_end();
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim_end()
}
