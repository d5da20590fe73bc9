//! Classified inbound events.

use serde::{Deserialize, Serialize};

use crate::entry::EntryKind;

/// Discriminant of an inbound server event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Agent message.
    Ai,
    /// Tool output.
    ToolResult,
    /// Anything else the agent streamed.
    Other,
    /// Server-reported failure.
    Error,
    /// End of the current query's stream.
    End,
}

impl EventKind {
    /// Parse a wire `type` value.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "ai" => Some(Self::Ai),
            "tool_result" => Some(Self::ToolResult),
            "other" => Some(Self::Other),
            "error" => Some(Self::Error),
            "end" => Some(Self::End),
            _ => None,
        }
    }

    /// Transcript kind for events that become entries.
    ///
    /// `End` produces no entry.
    #[must_use]
    pub const fn entry_kind(self) -> Option<EntryKind> {
        match self {
            Self::Ai => Some(EntryKind::Ai),
            Self::ToolResult => Some(EntryKind::ToolResult),
            Self::Other => Some(EntryKind::Other),
            Self::Error => Some(EntryKind::Error),
            Self::End => None,
        }
    }
}

/// One parsed frame. Consumed by the transcript and then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub content: Option<String>,
    pub detail: Option<String>,
    pub trace: Option<String>,
}

impl InboundEvent {
    /// Event of `kind` with no payload.
    #[must_use]
    pub const fn new(kind: EventKind) -> Self {
        Self {
            kind,
            content: None,
            detail: None,
            trace: None,
        }
    }

    /// Content-bearing event.
    #[must_use]
    pub fn with_content(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(kind)
        }
    }

    /// Error event carrying `detail`.
    #[must_use]
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(EventKind::Error)
        }
    }

    /// End-of-stream event.
    #[must_use]
    pub const fn end() -> Self {
        Self::new(EventKind::End)
    }
}
