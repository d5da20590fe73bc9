//! Streaming session client for remote agent reasoning traces.
//!
//! Provides:
//! - `SessionMachine` - Query-cycle state machine, free of I/O
//! - `SessionController` - Public façade owning the connection

pub mod controller;
pub mod machine;

pub use controller::SessionController;
pub use machine::{SessionMachine, SubmitError};

pub use agent_trace_core::{
    ClientConfig, ConnectionPhase, EntryKind, QueryCycle, SessionState, TranscriptEntry,
    TranscriptUpdate,
};

#[cfg(feature = "websocket")]
pub use agent_trace_transport::WsConnector;
