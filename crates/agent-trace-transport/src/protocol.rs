//! Wire protocol for agent streams.
//!
//! Queries go out as bare text frames. Every inbound frame is one JSON
//! record: `{"type": ..., "content"?: ..., "detail"?: ..., "trace"?: ...}`.

use agent_trace_core::{EventKind, InboundEvent, UnknownKindPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Record sent by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Event kind name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload text for `ai`, `tool_result` and `other`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Error message for `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// Server-side stack trace for `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

impl ServerRecord {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            content: None,
            detail: None,
            trace: None,
        }
    }

    fn with_content(kind: &str, content: impl Into<String>) -> Self {
        Self {
            content: Some(Value::String(content.into())),
            ..Self::new(kind)
        }
    }

    /// `ai` record.
    #[must_use]
    pub fn ai(content: impl Into<String>) -> Self {
        Self::with_content("ai", content)
    }

    /// `tool_result` record.
    #[must_use]
    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::with_content("tool_result", content)
    }

    /// `other` record.
    #[must_use]
    pub fn other(content: impl Into<String>) -> Self {
        Self::with_content("other", content)
    }

    /// `end` record.
    #[must_use]
    pub fn end() -> Self {
        Self::new("end")
    }

    /// `error` record.
    #[must_use]
    pub fn error(detail: impl Into<String>, trace: Option<String>) -> Self {
        Self {
            detail: Some(Value::String(detail.into())),
            trace: trace.map(Value::String),
            ..Self::new("error")
        }
    }

    /// Encode as a frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Classification failure. The frame is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),
}

/// Parse one raw frame into an event.
///
/// # Errors
/// Returns `MalformedFrame` if the frame is not a JSON object with a string
/// `type`, and `UnknownEventKind` if the kind is unrecognised and `policy`
/// rejects unknown kinds.
pub fn classify(raw: &str, policy: UnknownKindPolicy) -> Result<InboundEvent, ClassifyError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ClassifyError::MalformedFrame(e.to_string()))?;
    if !value.is_object() {
        return Err(ClassifyError::MalformedFrame("expected a JSON object".into()));
    }
    let record: ServerRecord =
        serde_json::from_value(value).map_err(|e| ClassifyError::MalformedFrame(e.to_string()))?;

    let kind = match (EventKind::from_wire(&record.kind), policy) {
        (Some(kind), _) => kind,
        (None, UnknownKindPolicy::Other) => {
            tracing::debug!(kind = %record.kind, "Classifying unknown event kind as other");
            EventKind::Other
        }
        (None, UnknownKindPolicy::Reject) => {
            return Err(ClassifyError::UnknownEventKind(record.kind));
        }
    };

    Ok(InboundEvent {
        kind,
        content: record.content.and_then(into_text),
        detail: record.detail.and_then(into_text),
        trace: record.trace.and_then(into_text),
    })
}

fn into_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
