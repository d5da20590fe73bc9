//! Query-cycle state machine.
//!
//! `SessionMachine` holds all session state and changes only in response to
//! discrete inputs: a submission, an inbound frame, a phase change, a
//! transport error or a clear. It performs no I/O and needs no runtime.

use std::sync::Arc;

use agent_trace_core::{
    Appended, ConnectionPhase, InboundEvent, QueryCycle, SessionState, Transcript,
    TranscriptEntry, TransportError, UnknownKindPolicy, transcript::TranscriptUpdate,
};
use agent_trace_transport::{CONNECTION_ERROR_TEXT, ConnectionError, classify};
use futures::stream::BoxStream;
use thiserror::Error;

/// Why a submission was rejected. State is unchanged in every case.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Query is empty")]
    EmptyQuery,
    #[error("Not connected")]
    NotConnected,
    #[error("A query is already in flight")]
    QueryInFlight,
}

impl From<ConnectionError> for SubmitError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::NotConnected => Self::NotConnected,
        }
    }
}

/// Session state driven by discrete inputs.
pub struct SessionMachine {
    transcript: Transcript,
    phase: ConnectionPhase,
    cycle: QueryCycle,
    unknown_kinds: UnknownKindPolicy,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(UnknownKindPolicy::default())
    }
}

impl SessionMachine {
    #[must_use]
    pub fn new(unknown_kinds: UnknownKindPolicy) -> Self {
        Self {
            transcript: Transcript::new(),
            phase: ConnectionPhase::default(),
            cycle: QueryCycle::Idle,
            unknown_kinds,
        }
    }

    /// Submit a query.
    ///
    /// `transmit` is called with the verbatim text once validation passes;
    /// state changes only if it succeeds.
    ///
    /// # Errors
    /// Returns the rejection reason; the session is left untouched.
    pub fn submit<F>(&mut self, text: &str, transmit: F) -> Result<(), SubmitError>
    where
        F: FnOnce(&str) -> Result<(), SubmitError>,
    {
        if text.trim().is_empty() {
            return Err(SubmitError::EmptyQuery);
        }
        if !self.phase.is_open() {
            return Err(SubmitError::NotConnected);
        }
        if self.cycle.is_loading() {
            return Err(SubmitError::QueryInFlight);
        }

        transmit(text)?;

        self.transcript.begin_query(text);
        self.cycle = QueryCycle::Submitted;
        Ok(())
    }

    /// Handle one raw inbound frame. Malformed frames are dropped.
    pub fn on_frame(&mut self, raw: &str) -> Option<Appended> {
        match classify(raw, self.unknown_kinds) {
            Ok(event) => Some(self.on_event(event)),
            Err(e) => {
                tracing::warn!("Dropping frame: {e}");
                None
            }
        }
    }

    /// Handle one classified event.
    pub fn on_event(&mut self, event: InboundEvent) -> Appended {
        if let Some(trace) = &event.trace {
            tracing::debug!("Agent error trace:\n{trace}");
        }

        let appended = self.transcript.append(event);
        match &appended {
            Appended::Entry(_) => {}
            Appended::Error(_) => self.resolve(QueryCycle::Failed),
            Appended::EndOfStream { .. } => self.resolve(QueryCycle::Completed),
        }
        appended
    }

    /// Handle a connection phase change.
    pub fn on_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        if matches!(phase, ConnectionPhase::Closed(_)) {
            self.resolve(QueryCycle::Interrupted);
        }
    }

    /// Handle a transport failure by recording a synthetic error.
    pub fn on_transport_error(&mut self, error: &TransportError) -> Appended {
        tracing::debug!("Recording transport error: {error}");
        self.on_event(InboundEvent::error(CONNECTION_ERROR_TEXT))
    }

    /// Empty the transcript and end loading. The connection phase is kept.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.cycle = QueryCycle::Idle;
    }

    fn resolve(&mut self, outcome: QueryCycle) {
        if self.cycle.is_loading() {
            self.cycle = outcome;
        }
    }

    /// Current cycle.
    #[must_use]
    pub const fn cycle(&self) -> QueryCycle {
        self.cycle
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.cycle.is_loading()
    }

    /// Transcript entries in arrival order.
    #[must_use]
    pub fn entries(&self) -> &[Arc<TranscriptEntry>] {
        self.transcript.entries()
    }

    /// Final result of the current cycle.
    #[must_use]
    pub const fn final_result(&self) -> Option<&Arc<TranscriptEntry>> {
        self.transcript.final_result()
    }

    /// History followed by live transcript updates.
    #[must_use]
    pub fn transcript_stream(&self) -> BoxStream<'static, TranscriptUpdate> {
        self.transcript.history_plus_stream()
    }

    /// Snapshot for rendering.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        SessionState {
            connection_phase: self.phase,
            is_loading: self.cycle.is_loading(),
            cycle: self.cycle,
            transcript: self.transcript.entries().to_vec(),
            final_result: self.transcript.final_result().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_trace_core::{Closure, EntryKind};

    use super::*;

    fn open_machine() -> SessionMachine {
        let mut m = SessionMachine::default();
        m.on_phase(ConnectionPhase::Open);
        m
    }

    fn submit(m: &mut SessionMachine, text: &str, sent: &mut Vec<String>) -> Result<(), SubmitError> {
        m.submit(text, |q| {
            sent.push(q.to_string());
            Ok(())
        })
    }

    fn kinds(m: &SessionMachine) -> Vec<(EntryKind, String)> {
        m.entries().iter().map(|e| (e.kind, e.text.clone())).collect()
    }

    #[test]
    fn test_round_trip_scenario() {
        let mut m = open_machine();
        let mut sent = Vec::new();
        submit(&mut m, "2+2?", &mut sent).unwrap();
        assert_eq!(sent, vec!["2+2?"]);
        assert!(m.is_loading());

        for frame in [
            r#"{"type":"ai","content":"computing"}"#,
            r#"{"type":"tool_result","content":"4"}"#,
            r#"{"type":"ai","content":"The answer is 4"}"#,
            r#"{"type":"end"}"#,
        ] {
            m.on_frame(frame).unwrap();
        }

        assert_eq!(
            kinds(&m),
            vec![
                (EntryKind::User, "2+2?".into()),
                (EntryKind::Ai, "computing".into()),
                (EntryKind::ToolResult, "4".into()),
                (EntryKind::Ai, "The answer is 4".into()),
            ]
        );
        assert_eq!(m.final_result().unwrap().text, "The answer is 4");
        assert!(!m.is_loading());
        assert_eq!(m.cycle(), QueryCycle::Completed);

        m.clear();
        let state = m.snapshot();
        assert!(state.transcript.is_empty());
        assert!(state.final_result.is_none());
        assert!(!state.is_loading);
        assert_eq!(state.connection_phase, ConnectionPhase::Open);
    }

    #[test]
    fn test_rejections_leave_state_unchanged() {
        let mut sent = Vec::new();

        let mut closed = SessionMachine::default();
        assert_eq!(
            submit(&mut closed, "hi", &mut sent),
            Err(SubmitError::NotConnected)
        );

        let mut m = open_machine();
        assert_eq!(submit(&mut m, "   \n", &mut sent), Err(SubmitError::EmptyQuery));
        assert!(m.entries().is_empty());

        submit(&mut m, "first", &mut sent).unwrap();
        assert_eq!(
            submit(&mut m, "second", &mut sent),
            Err(SubmitError::QueryInFlight)
        );
        assert_eq!(sent, vec!["first"]);
        assert_eq!(m.entries().len(), 1);
    }

    #[test]
    fn test_failed_transmit_records_nothing() {
        let mut m = open_machine();
        let result = m.submit("hi", |_| Err(SubmitError::NotConnected));
        assert_eq!(result, Err(SubmitError::NotConnected));
        assert!(m.entries().is_empty());
        assert_eq!(m.cycle(), QueryCycle::Idle);
    }

    #[test]
    fn test_error_supersedes_candidate() {
        let mut m = open_machine();
        submit(&mut m, "q", &mut Vec::new()).unwrap();
        m.on_frame(r#"{"type":"ai","content":"almost"}"#);
        m.on_frame(r#"{"type":"error","detail":"tool crashed","trace":"..."}"#);
        assert_eq!(m.cycle(), QueryCycle::Failed);
        assert!(!m.is_loading());

        m.on_frame(r#"{"type":"end"}"#);
        assert!(m.final_result().is_none());
        assert_eq!(m.entries().last().unwrap().text, "tool crashed");
        // The late end does not turn a failed cycle into a completed one.
        assert_eq!(m.cycle(), QueryCycle::Failed);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut m = open_machine();
        submit(&mut m, "q", &mut Vec::new()).unwrap();
        assert!(m.on_frame("{oops").is_none());
        assert_eq!(m.entries().len(), 1);
        assert!(m.is_loading());
    }

    #[test]
    fn test_unexpected_close_ends_loading() {
        let mut m = open_machine();
        submit(&mut m, "q", &mut Vec::new()).unwrap();
        m.on_phase(ConnectionPhase::Closed(Closure::Reconnecting { attempt: 1 }));
        assert_eq!(m.cycle(), QueryCycle::Interrupted);
        assert_eq!(m.entries().len(), 1);
        assert_eq!(
            submit(&mut m, "again", &mut Vec::new()),
            Err(SubmitError::NotConnected)
        );
    }

    #[test]
    fn test_transport_error_appends_synthetic_entry() {
        let mut m = open_machine();
        submit(&mut m, "q", &mut Vec::new()).unwrap();
        m.on_transport_error(&TransportError::Io("reset".into()));

        let last = m.entries().last().unwrap();
        assert_eq!(last.kind, EntryKind::Error);
        assert_eq!(last.text, CONNECTION_ERROR_TEXT);
        assert_eq!(m.cycle(), QueryCycle::Failed);
    }

    #[test]
    fn test_late_events_after_clear_are_appended() {
        let mut m = open_machine();
        submit(&mut m, "q", &mut Vec::new()).unwrap();
        m.clear();
        m.on_frame(r#"{"type":"ai","content":"late"}"#);
        m.on_frame(r#"{"type":"end"}"#);

        assert_eq!(kinds(&m), vec![(EntryKind::Ai, "late".into())]);
        assert_eq!(m.final_result().unwrap().text, "late");
        assert_eq!(m.cycle(), QueryCycle::Idle);
    }

    #[test]
    fn test_transcript_stream_replays_history() {
        use futures::StreamExt;

        let mut m = open_machine();
        submit(&mut m, "q", &mut Vec::new()).unwrap();

        let mut stream = m.transcript_stream();
        let mut next = tokio_test::task::spawn(stream.next());
        let update = tokio_test::assert_ready!(next.poll());
        assert!(matches!(update, Some(TranscriptUpdate::Appended(e)) if e.text == "q"));
    }

    #[test]
    fn test_next_query_clears_previous_result() {
        let mut m = open_machine();
        submit(&mut m, "one", &mut Vec::new()).unwrap();
        m.on_frame(r#"{"type":"ai","content":"1"}"#);
        m.on_frame(r#"{"type":"end"}"#);
        assert!(m.final_result().is_some());

        submit(&mut m, "two", &mut Vec::new()).unwrap();
        assert!(m.final_result().is_none());
        m.on_frame(r#"{"type":"tool_result","content":"x"}"#);
        m.on_frame(r#"{"type":"end"}"#);
        assert!(m.final_result().is_none());
        assert_eq!(m.cycle(), QueryCycle::Completed);
    }
}
