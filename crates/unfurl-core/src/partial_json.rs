//! Tolerant parser for truncated JSON.
//!
//! Parses the longest well-formed prefix of a document and closes whatever
//! is still open at the cut: unterminated strings keep what they have,
//! objects and arrays are closed, keys without a value are dropped, partial
//! literals and numbers resolve to their longest valid reading. Trailing
//! commas are accepted. Parsing stops at the first byte that cannot
//! continue the document, or at a container nested deeper than
//! [`MAX_DEPTH`].

use serde_json::{Map, Number, Value};

/// Deepest container nesting the parser descends into. Matches the
/// recursion limit of `serde_json::from_str`.
pub const MAX_DEPTH: usize = 128;

/// Outcome of a tolerant parse.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialParse {
    /// Best-effort root value. `None` when no document start was found.
    pub value: Option<Value>,
    /// The input ended before the document did.
    pub truncated: bool,
    /// Parsing stopped on a byte that could not continue the document.
    pub invalid: bool,
}

impl PartialParse {
    /// True when nothing useful was recovered.
    pub fn is_empty(&self) -> bool {
        match &self.value {
            None => true,
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(_) => false,
        }
    }
}

/// Byte offset of the first `{` or `[`, where the document starts.
pub fn document_start(text: &str) -> Option<usize> {
    text.find(&['{', '['][..])
}

/// Parse the document that starts at the first `{` or `[` in `text`.
pub fn parse_partial(text: &str) -> PartialParse {
    let Some(start) = document_start(text) else {
        return PartialParse {
            value: None,
            truncated: false,
            invalid: false,
        };
    };

    let mut parser = Parser::new(&text.as_bytes()[start..]);
    let value = parser.parse_value();
    PartialParse {
        value,
        truncated: parser.state == Halt::Truncated,
        invalid: parser.state == Halt::Invalid,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Running,
    Truncated,
    Invalid,
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
    state: Halt,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
            state: Halt::Running,
        }
    }

    fn halted(&self) -> bool {
        self.state != Halt::Running
    }

    fn truncate(&mut self) {
        if self.state == Halt::Running {
            self.state = Halt::Truncated;
        }
    }

    fn invalid(&mut self) {
        if self.state == Halt::Running {
            self.state = Halt::Invalid;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn parse_value(&mut self) -> Option<Value> {
        self.skip_whitespace();
        let Some(b) = self.peek() else {
            self.truncate();
            return None;
        };

        if matches!(b, b'{' | b'[') && self.depth >= MAX_DEPTH {
            self.invalid();
            return None;
        }

        match b {
            b'{' => Some(self.parse_object()),
            b'[' => Some(self.parse_array()),
            b'"' => self.parse_string().map(|(s, _)| Value::String(s)),
            b't' => self.parse_literal("true", Value::Bool(true)),
            b'f' => self.parse_literal("false", Value::Bool(false)),
            b'n' => self.parse_literal("null", Value::Null),
            b'-' | b'0'..=b'9' => self.parse_number(),
            _ => {
                self.invalid();
                None
            }
        }
    }

    fn parse_object(&mut self) -> Value {
        self.pos += 1; // '{'
        self.depth += 1;
        let mut map = Map::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => {
                    self.truncate();
                    break;
                }
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b'"') => {
                    let Some((key, complete)) = self.parse_string() else {
                        break;
                    };
                    if !complete {
                        break;
                    }

                    self.skip_whitespace();
                    match self.peek() {
                        None => {
                            self.truncate();
                            break;
                        }
                        Some(b':') => self.pos += 1,
                        Some(_) => {
                            self.invalid();
                            break;
                        }
                    }

                    if let Some(value) = self.parse_value() {
                        map.insert(key, value);
                    }
                    if self.halted() {
                        break;
                    }
                }
                Some(_) => {
                    self.invalid();
                    break;
                }
            }
        }

        self.depth -= 1;
        Value::Object(map)
    }

    fn parse_array(&mut self) -> Value {
        self.pos += 1; // '['
        self.depth += 1;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => {
                    self.truncate();
                    break;
                }
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(b',') => {
                    self.pos += 1;
                }
                Some(_) => {
                    if let Some(value) = self.parse_value() {
                        items.push(value);
                    }
                    if self.halted() {
                        break;
                    }
                }
            }
        }

        self.depth -= 1;
        Value::Array(items)
    }

    /// Returns the decoded text and whether the closing quote was seen.
    fn parse_string(&mut self) -> Option<(String, bool)> {
        self.pos += 1; // opening quote
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let Some(b) = self.peek() else {
                self.truncate();
                return Some((String::from_utf8_lossy(&buf).into_owned(), false));
            };
            self.pos += 1;

            match b {
                b'"' => return Some((String::from_utf8_lossy(&buf).into_owned(), true)),
                b'\\' => {
                    if !self.parse_escape(&mut buf) {
                        // Incomplete escape at the end of input: drop it.
                        return Some((String::from_utf8_lossy(&buf).into_owned(), false));
                    }
                }
                _ => buf.push(b),
            }
        }
    }

    /// Decode one escape sequence after a backslash. Returns false when the
    /// input ends inside it.
    fn parse_escape(&mut self, buf: &mut Vec<u8>) -> bool {
        let Some(b) = self.peek() else {
            self.truncate();
            return false;
        };
        self.pos += 1;

        let decoded = match b {
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'/' => '/',
            b'\\' => '\\',
            b'"' => '"',
            b'u' => {
                let Some(high) = self.read_hex4() else {
                    return false;
                };
                if (0xD800..0xDC00).contains(&high) {
                    // Surrogate pair: the low half must follow as another \uXXXX.
                    if self.input.len() < self.pos + 6 {
                        self.pos = self.input.len();
                        self.truncate();
                        return false;
                    }
                    if self.input[self.pos] == b'\\' && self.input[self.pos + 1] == b'u' {
                        self.pos += 2;
                        let Some(low) = self.read_hex4() else {
                            return false;
                        };
                        let combined = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
                        char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                } else {
                    char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER)
                }
            }
            // Unknown escape: keep the character as written.
            other => other as char,
        };

        let mut tmp = [0u8; 4];
        buf.extend_from_slice(decoded.encode_utf8(&mut tmp).as_bytes());
        true
    }

    fn read_hex4(&mut self) -> Option<u32> {
        if self.input.len() < self.pos + 4 {
            self.pos = self.input.len();
            self.truncate();
            return None;
        }
        let digits = std::str::from_utf8(&self.input[self.pos..self.pos + 4]).ok()?;
        let code = u32::from_str_radix(digits, 16).ok();
        self.pos += 4;
        if code.is_none() {
            self.invalid();
        }
        code
    }

    fn parse_literal(&mut self, literal: &str, value: Value) -> Option<Value> {
        let expected = literal.as_bytes();
        let available = &self.input[self.pos..];
        let n = available.len().min(expected.len());

        if available[..n] != expected[..n] {
            self.invalid();
            return None;
        }

        self.pos += n;
        if n < expected.len() {
            // A prefix of the literal at the end of the input can only
            // become that literal.
            self.truncate();
        }
        Some(value)
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek().is_none() {
            self.truncate();
        }

        let text = std::str::from_utf8(&self.input[start..self.pos]).ok()?;
        // A number cut by the end of input reads as its longest complete
        // prefix ("12." -> 12, "1e-" -> 1). A finished token must read as is.
        let text = if self.state == Halt::Truncated {
            text.trim_end_matches(&['.', 'e', 'E', '+', '-'][..])
        } else {
            text
        };
        match parse_number_text(text) {
            Some(number) => Some(Value::Number(number)),
            None => {
                self.invalid();
                None
            }
        }
    }
}

fn parse_number_text(text: &str) -> Option<Number> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Number::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Number::from(n));
    }
    // Rust's float parser accepts "12." and "+1"; JSON does not.
    if text.ends_with('.') || text.starts_with('+') {
        return None;
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}
