//! Append-only transcript with final-result tracking.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    entry::{EntryKind, TranscriptEntry},
    event::{EventKind, InboundEvent},
};

/// Text used for error events that carry no detail.
pub const DEFAULT_ERROR_TEXT: &str = "An error occurred";

const UPDATE_CAPACITY: usize = 1024;

/// Live change to a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptUpdate {
    /// An entry was appended.
    Appended(Arc<TranscriptEntry>),
    /// The stream ended; the final result (if any) was published.
    Finalized(Option<Arc<TranscriptEntry>>),
    /// The transcript was emptied.
    Cleared,
}

/// Outcome of appending an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    /// A regular entry was added.
    Entry(Arc<TranscriptEntry>),
    /// An error entry was added; loading should end.
    Error(Arc<TranscriptEntry>),
    /// End of stream; nothing appended.
    EndOfStream {
        final_result: Option<Arc<TranscriptEntry>>,
    },
}

/// Ordered transcript of one session.
///
/// Entries are appended strictly in the order events are handed in. The most
/// recent `ai` entry is remembered as the candidate answer and is promoted
/// to the final result only when an `end` event arrives.
pub struct Transcript {
    entries: Vec<Arc<TranscriptEntry>>,
    last_ai: Option<Arc<TranscriptEntry>>,
    final_result: Option<Arc<TranscriptEntry>>,
    sender: broadcast::Sender<TranscriptUpdate>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            entries: Vec::with_capacity(32),
            last_ai: None,
            final_result: None,
            sender,
        }
    }

    /// Start a query cycle: drop the previous answer and record the query.
    pub fn begin_query(&mut self, text: impl Into<String>) -> Arc<TranscriptEntry> {
        self.final_result = None;
        self.last_ai = None;
        self.push(EntryKind::User, text.into())
    }

    /// Append one classified event.
    pub fn append(&mut self, event: InboundEvent) -> Appended {
        match event.kind {
            EventKind::End => {
                self.final_result = self.last_ai.clone();
                let _ = self
                    .sender
                    .send(TranscriptUpdate::Finalized(self.final_result.clone()));
                Appended::EndOfStream {
                    final_result: self.final_result.clone(),
                }
            }
            EventKind::Error => {
                self.last_ai = None;
                let text = event
                    .detail
                    .unwrap_or_else(|| DEFAULT_ERROR_TEXT.to_string());
                Appended::Error(self.push(EntryKind::Error, text))
            }
            EventKind::Ai => {
                let entry = self.push(EntryKind::Ai, event.content.unwrap_or_default());
                self.last_ai = Some(Arc::clone(&entry));
                Appended::Entry(entry)
            }
            EventKind::ToolResult => {
                Appended::Entry(self.push(EntryKind::ToolResult, event.content.unwrap_or_default()))
            }
            EventKind::Other => {
                Appended::Entry(self.push(EntryKind::Other, event.content.unwrap_or_default()))
            }
        }
    }

    /// Empty the transcript and forget any answer.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_ai = None;
        self.final_result = None;
        let _ = self.sender.send(TranscriptUpdate::Cleared);
    }

    fn push(&mut self, kind: EntryKind, text: String) -> Arc<TranscriptEntry> {
        let entry = Arc::new(TranscriptEntry::new(kind, text));
        self.entries.push(Arc::clone(&entry));
        let _ = self.sender.send(TranscriptUpdate::Appended(Arc::clone(&entry)));
        entry
    }

    /// Entries in arrival order.
    #[must_use]
    pub fn entries(&self) -> &[Arc<TranscriptEntry>] {
        &self.entries
    }

    /// Published final result of the current cycle.
    #[must_use]
    pub const fn final_result(&self) -> Option<&Arc<TranscriptEntry>> {
        self.final_result.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptUpdate> {
        self.sender.subscribe()
    }

    /// Stream that yields the current entries first, then live updates.
    ///
    /// Updates dropped because the receiver lagged are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, TranscriptUpdate> {
        let (history, rx) = (self.entries.clone(), self.subscribe());

        let hist = futures::stream::iter(history.into_iter().map(TranscriptUpdate::Appended));
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(update) => Some(update),
                Err(e) => {
                    tracing::warn!("Transcript subscriber lagged: {e}");
                    None
                }
            }
        });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(t: &Transcript) -> Vec<(EntryKind, &str)> {
        t.entries().iter().map(|e| (e.kind, e.text.as_str())).collect()
    }

    #[test]
    fn test_entries_keep_arrival_order() {
        let mut t = Transcript::new();
        t.begin_query("q");
        t.append(InboundEvent::with_content(EventKind::Other, "plan"));
        t.append(InboundEvent::with_content(EventKind::Ai, "a"));
        t.append(InboundEvent::with_content(EventKind::ToolResult, "t"));
        t.append(InboundEvent::with_content(EventKind::Ai, "b"));

        assert_eq!(
            texts(&t),
            vec![
                (EntryKind::User, "q"),
                (EntryKind::Other, "plan"),
                (EntryKind::Ai, "a"),
                (EntryKind::ToolResult, "t"),
                (EntryKind::Ai, "b"),
            ]
        );
    }

    #[test]
    fn test_end_promotes_last_ai() {
        let mut t = Transcript::new();
        t.begin_query("q");
        t.append(InboundEvent::with_content(EventKind::Ai, "first"));
        t.append(InboundEvent::with_content(EventKind::Ai, "second"));
        assert!(t.final_result().is_none());

        let Appended::EndOfStream { final_result } = t.append(InboundEvent::end()) else {
            panic!("expected end of stream");
        };
        assert_eq!(final_result.unwrap().text, "second");
        assert_eq!(t.final_result().unwrap().text, "second");
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_end_without_ai_leaves_no_result() {
        let mut t = Transcript::new();
        t.begin_query("q");
        t.append(InboundEvent::with_content(EventKind::ToolResult, "4"));
        assert_eq!(
            t.append(InboundEvent::end()),
            Appended::EndOfStream { final_result: None }
        );
    }

    #[test]
    fn test_error_clears_candidate() {
        let mut t = Transcript::new();
        t.begin_query("q");
        t.append(InboundEvent::with_content(EventKind::Ai, "maybe"));

        let Appended::Error(entry) = t.append(InboundEvent::new(EventKind::Error)) else {
            panic!("expected error");
        };
        assert_eq!(entry.kind, EntryKind::Error);
        assert_eq!(entry.text, DEFAULT_ERROR_TEXT);

        t.append(InboundEvent::end());
        assert!(t.final_result().is_none());
    }

    #[test]
    fn test_begin_query_resets_previous_answer() {
        let mut t = Transcript::new();
        t.begin_query("one");
        t.append(InboundEvent::with_content(EventKind::Ai, "1"));
        t.append(InboundEvent::end());
        assert!(t.final_result().is_some());

        t.begin_query("two");
        assert!(t.final_result().is_none());
        t.append(InboundEvent::end());
        assert!(t.final_result().is_none());
    }

    #[test]
    fn test_missing_content_is_empty_text() {
        let mut t = Transcript::new();
        let Appended::Entry(entry) = t.append(InboundEvent::new(EventKind::Other)) else {
            panic!("expected entry");
        };
        assert_eq!(entry.text, "");
    }

    #[test]
    fn test_live_stream_waits_for_updates() {
        let mut t = Transcript::new();
        let mut stream = t.history_plus_stream();

        let mut next = tokio_test::task::spawn(stream.next());
        tokio_test::assert_pending!(next.poll());

        t.append(InboundEvent::end());
        assert!(next.is_woken());
        let update = tokio_test::assert_ready!(next.poll());
        assert_eq!(update, Some(TranscriptUpdate::Finalized(None)));
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let mut t = Transcript::new();
        t.begin_query("q");
        let mut stream = t.history_plus_stream();

        t.append(InboundEvent::with_content(EventKind::Ai, "live"));
        t.clear();

        let first = stream.next().await.unwrap();
        assert!(matches!(first, TranscriptUpdate::Appended(e) if e.text == "q"));
        let second = stream.next().await.unwrap();
        assert!(matches!(second, TranscriptUpdate::Appended(e) if e.text == "live"));
        assert_eq!(stream.next().await.unwrap(), TranscriptUpdate::Cleared);
    }
}
