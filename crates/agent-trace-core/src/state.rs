//! Connection phases, query cycles and the session snapshot.

use std::sync::Arc;

use serde::Serialize;

use crate::entry::TranscriptEntry;

/// Why a connection is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "closure", rename_all = "snake_case")]
pub enum Closure {
    /// The owner asked for the close. No reconnect.
    Requested,
    /// Closed unexpectedly; reconnect attempt `attempt` is scheduled.
    Reconnecting { attempt: u32 },
    /// Reconnect budget spent. Stays closed until reopened explicitly.
    Exhausted,
}

/// Lifecycle phase of the agent connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed(Closure),
}

impl ConnectionPhase {
    /// Whether frames can be sent.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether the connection gave up reconnecting.
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        matches!(self, Self::Closed(Closure::Exhausted))
    }

    /// Human-readable status label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Open => "Connected",
            Self::Closing => "Closing",
            Self::Closed(_) => "Disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// State of the current query cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCycle {
    /// No query submitted yet (or the session was cleared).
    #[default]
    Idle,
    /// A query is in flight.
    Submitted,
    /// The stream ended; the final result may or may not be set.
    Completed,
    /// An error was appended.
    Failed,
    /// The connection closed mid-query without an error frame.
    Interrupted,
}

impl QueryCycle {
    /// Whether a query is in flight.
    #[must_use]
    pub const fn is_loading(self) -> bool {
        matches!(self, Self::Submitted)
    }
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub connection_phase: ConnectionPhase,
    pub is_loading: bool,
    pub cycle: QueryCycle,
    pub transcript: Vec<Arc<TranscriptEntry>>,
    pub final_result: Option<Arc<TranscriptEntry>>,
}

impl SessionState {
    /// Whether the connection is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection_phase.is_open()
    }

    /// Status label for the connection.
    #[must_use]
    pub const fn connection_status(&self) -> &'static str {
        self.connection_phase.label()
    }

    /// Number of transcript entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.transcript.len()
    }
}
