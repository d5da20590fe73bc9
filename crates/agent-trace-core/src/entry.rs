//! Transcript entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entry identifier.
pub type EntryId = Uuid;

/// Who (or what) authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Query submitted by the local user.
    User,
    /// Agent reasoning or answer text.
    Ai,
    /// Output of a tool the agent invoked.
    ToolResult,
    /// Any other step the agent reported.
    Other,
    /// Server-reported or connection error.
    Error,
}

impl EntryKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
            Self::ToolResult => "tool_result",
            Self::Other => "other",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Unique entry identifier.
    pub id: EntryId,
    /// Entry kind.
    pub kind: EntryKind,
    /// Entry text.
    pub text: String,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
}

impl TranscriptEntry {
    /// Create an entry with a fresh id and the current time.
    #[must_use]
    pub fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            text: text.into(),
            created_at: now_millis(),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
