//! Transport seams.
//!
//! The connection manager is written against these traits; the WebSocket
//! implementation lives in `agent-trace-transport`, and tests substitute
//! in-memory channels.

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Connection lost: {0}")]
    Io(String),
    #[error("Connection closed")]
    Closed,
}

/// One established bidirectional frame stream.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame.
    ///
    /// `None` means the peer closed the stream cleanly.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the stream.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for connections to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced.
    type Conn: Connection;

    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Self::Conn, TransportError>;
}
