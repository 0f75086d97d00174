//! Last-resort field scraping.
//!
//! When the text cannot be parsed as a document at all, a handful of
//! well-known top-level keys are pulled out with regular expressions so the
//! consumer sees something before the structure settles.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};
use tracing::debug;

const STRING_KEYS: &[&str] = &["title", "content", "body", "summary"];
const NUMBER_KEYS: &[&str] = &[
    "episode",
    "episodeNumber",
    "episode_number",
    "totalEpisodes",
    "episodeCount",
    "wordCount",
    "count",
];

static DEFAULT_SCRAPER: Lazy<FieldScraper> =
    Lazy::new(|| FieldScraper::new(STRING_KEYS, NUMBER_KEYS));

#[derive(Debug, Clone)]
struct KeyPattern {
    key: String,
    regex: Regex,
}

#[derive(Debug, Clone)]
pub struct FieldScraper {
    strings: Vec<KeyPattern>,
    numbers: Vec<KeyPattern>,
}

impl FieldScraper {
    pub fn new(string_keys: &[&str], number_keys: &[&str]) -> Self {
        // Strings may be unterminated: capture up to the closing quote or the end.
        let strings = string_keys
            .iter()
            .filter_map(|key| {
                let pattern = format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)"#, regex::escape(key));
                compile(key, &pattern)
            })
            .collect();
        let numbers = number_keys
            .iter()
            .filter_map(|key| {
                let pattern = format!(r#""{}"\s*:\s*(-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)"#, regex::escape(key));
                compile(key, &pattern)
            })
            .collect();

        Self { strings, numbers }
    }

    /// Scraper for the keys a generated story document is known to carry.
    pub fn standard() -> &'static FieldScraper {
        &DEFAULT_SCRAPER
    }

    /// Collect every known key found in `text`. First occurrence wins.
    pub fn scrape(&self, text: &str) -> Map<String, Value> {
        let mut found = Map::new();

        for pattern in &self.numbers {
            if let Some(number) = pattern
                .regex
                .captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| parse_number(m.as_str()))
            {
                found.insert(pattern.key.clone(), Value::Number(number));
            }
        }

        for pattern in &self.strings {
            if let Some(raw) = pattern.regex.captures(text).and_then(|caps| caps.get(1)) {
                found.insert(pattern.key.clone(), Value::String(unescape(raw.as_str())));
            }
        }

        if !found.is_empty() {
            debug!("Scraped {} field(s) from unparsable content", found.len());
        }
        found
    }
}

fn compile(key: &str, pattern: &str) -> Option<KeyPattern> {
    match Regex::new(pattern) {
        Ok(regex) => Some(KeyPattern {
            key: key.to_string(),
            regex,
        }),
        Err(e) => {
            debug!("Skipping scrape pattern for {}: {}", key, e);
            None
        }
    }
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Number::from(n));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Decode JSON escapes in a captured string body, which may end mid-escape.
fn unescape(raw: &str) -> String {
    let mut body = raw.to_string();
    if let Ok(decoded) = serde_json::from_str::<String>(&format!("\"{}\"", body)) {
        return decoded;
    }
    // Drop a dangling escape left by truncation and try again.
    if let Some(idx) = body.rfind('\\') {
        body.truncate(idx);
        if let Ok(decoded) = serde_json::from_str::<String>(&format!("\"{}\"", body)) {
            return decoded;
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scrapes_known_keys() {
        let text = r#"{episode: 3, "episode": 3, "title": "The \"Fall\"", "content": "It began"#;
        let found = FieldScraper::standard().scrape(text);
        assert_eq!(found.get("episode"), Some(&json!(3)));
        assert_eq!(found.get("title"), Some(&json!("The \"Fall\"")));
        assert_eq!(found.get("content"), Some(&json!("It began")));
        assert!(found.get("body").is_none());
    }

    #[test]
    fn test_dangling_escape() {
        let found = FieldScraper::standard().scrape(r#"'x' "title": "ab\"#);
        assert_eq!(found.get("title"), Some(&json!("ab")));
    }

    #[test]
    fn test_nothing_to_scrape() {
        assert!(FieldScraper::standard().scrape("no structure here").is_empty());
    }
}
