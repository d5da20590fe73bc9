//! In-memory transport.
//!
//! Useful for tests and offline development: the connector hands every
//! accepted connection to a [`MemoryServer`], which plays the agent side.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use agent_trace_core::{Connection, Connector, TransportError};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::ServerRecord;

#[derive(Default)]
struct Flags {
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

/// Connector producing in-memory connections.
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    flags: Arc<Flags>,
}

impl MemoryConnector {
    /// Create a connector and the server side that accepts its connections.
    #[must_use]
    pub fn new() -> (Self, MemoryServer) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let flags = Arc::new(Flags::default());

        let connector = Self {
            accepted,
            flags: Arc::clone(&flags),
        };
        (connector, MemoryServer { incoming, flags })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Conn = MemoryConnection;

    async fn connect(&self, url: &str) -> Result<MemoryConnection, TransportError> {
        self.flags.attempts.fetch_add(1, Ordering::SeqCst);
        if self.flags.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!("{url}: connection refused")));
        }

        let (queries_tx, queries_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        self.accepted
            .send(MemoryPeer {
                queries: queries_rx,
                frames: frames_tx,
            })
            .map_err(|_| TransportError::Connect(format!("{url}: server gone")))?;

        Ok(MemoryConnection {
            queries: Some(queries_tx),
            frames: frames_rx,
        })
    }
}

/// Agent side of the in-memory transport.
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
    flags: Arc<Flags>,
}

impl MemoryServer {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.flags.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connection attempts so far, including refused ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.flags.attempts.load(Ordering::SeqCst)
    }
}

/// One accepted connection, seen from the agent. Dropping it closes the
/// connection cleanly.
pub struct MemoryPeer {
    queries: mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryPeer {
    /// Next query sent by the client. `None` once the client closed.
    pub async fn recv_query(&mut self) -> Option<String> {
        self.queries.recv().await
    }

    /// Query sent by the client, if one is already waiting.
    pub fn try_recv_query(&mut self) -> Option<String> {
        self.queries.try_recv().ok()
    }

    /// Send a raw frame. Returns false if the client is gone.
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.frames.send(Ok(frame.into())).is_ok()
    }

    /// Send a record as a frame.
    pub fn send_record(&self, record: &ServerRecord) -> bool {
        record
            .to_frame()
            .is_ok_and(|frame| self.send_frame(frame))
    }

    /// Fail the connection with a transport error.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.frames.send(Err(TransportError::Io(reason.into())));
    }
}

/// Client side of an in-memory connection.
pub struct MemoryConnection {
    queries: Option<mpsc::UnboundedSender<String>>,
    frames: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.queries
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.frames.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.queries = None;
        self.frames.close();
        Ok(())
    }
}
