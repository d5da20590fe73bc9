//! Transport layer for streaming agent sessions.
//!
//! Provides:
//! - Wire protocol and event classification
//! - `ConnectionManager` with bounded reconnect
//! - WebSocket transport (feature: websocket)
//! - In-memory transport (feature: memory)

pub mod connection;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use connection::{CONNECTION_ERROR_TEXT, ConnectionError, ConnectionEvent, ConnectionManager};
pub use protocol::{ClassifyError, ServerRecord, classify};

#[cfg(feature = "websocket")]
pub use websocket::{WsConnection, WsConnector};
