//! Connection status for one session.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ThinkingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connected,
    Streaming,
    Thinking,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connected => "connected",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Thinking => "thinking",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle inputs observed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Connected,
    /// Content arrived from a text delta.
    Content,
    ThinkingStarted,
    ThinkingEnded,
    /// Explicit completion frame, or a completed snapshot.
    Completed,
    Failed(String),
}

/// Current status plus the orthogonal thinking flag.
///
/// `completed` is never inferred from silence; only an explicit
/// [`SessionSignal::Completed`] gets there. Terminal states ignore every
/// later signal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    status: SessionStatus,
    thinking: bool,
    error: Option<String>,
    mode: ThinkingMode,
}

impl SessionState {
    pub fn new(mode: ThinkingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a signal. Returns true when status, flag or error changed.
    pub fn apply(&mut self, signal: SessionSignal) -> bool {
        if self.is_terminal() {
            return false;
        }
        let before = (self.status, self.thinking);

        match signal {
            SessionSignal::Connected => {
                if self.status == SessionStatus::Idle {
                    self.status = SessionStatus::Connected;
                }
            }
            SessionSignal::Content => {
                if matches!(self.status, SessionStatus::Idle | SessionStatus::Connected) {
                    self.status = self.active_status();
                }
            }
            SessionSignal::ThinkingStarted => {
                self.thinking = true;
                if self.mode == ThinkingMode::Exclusive {
                    self.status = SessionStatus::Thinking;
                }
            }
            SessionSignal::ThinkingEnded => {
                self.thinking = false;
                if self.status == SessionStatus::Thinking {
                    self.status = SessionStatus::Streaming;
                }
            }
            SessionSignal::Completed => {
                self.status = SessionStatus::Completed;
                self.thinking = false;
            }
            SessionSignal::Failed(message) => {
                self.status = SessionStatus::Error;
                self.thinking = false;
                self.error = Some(message);
                return true;
            }
        }

        before != (self.status, self.thinking)
    }

    fn active_status(&self) -> SessionStatus {
        if self.thinking && self.mode == ThinkingMode::Exclusive {
            SessionStatus::Thinking
        } else {
            SessionStatus::Streaming
        }
    }
}
