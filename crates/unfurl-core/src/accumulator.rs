/// Growing text of one session.
///
/// Deltas are only ever appended, so the previous value is always a prefix
/// of the current one and is tracked as a length.
#[derive(Debug, Default, Clone)]
pub struct ContentAccumulator {
    accumulated: String,
    previous_len: usize,
    deltas: usize,
}

impl ContentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return the full accumulated content.
    pub fn push(&mut self, delta: &str) -> &str {
        self.previous_len = self.accumulated.len();
        self.accumulated.push_str(delta);
        self.deltas += 1;
        &self.accumulated
    }

    /// Replace the content wholesale with a stored result.
    ///
    /// Used for the fallback snapshot, which is not a continuation of the
    /// live text. The previous value becomes empty.
    pub fn replace(&mut self, content: String) -> &str {
        self.accumulated = content;
        self.previous_len = 0;
        &self.accumulated
    }

    pub fn current(&self) -> &str {
        &self.accumulated
    }

    /// The content as it was before the latest delta.
    pub fn previous(&self) -> &str {
        &self.accumulated[..self.previous_len]
    }

    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    pub fn len(&self) -> usize {
        self.accumulated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.previous_len = 0;
        self.deltas = 0;
    }
}
