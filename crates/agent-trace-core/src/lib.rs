//! Core data model for streaming agent sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `TranscriptEntry` / `InboundEvent` - Transcript lines and classified frames
//! - `Transcript` - Arrival-ordered transcript with final-result tracking
//! - `SessionState` - Read-only session snapshot
//! - `ClientConfig` - Endpoint and reconnect configuration
//! - Transport traits

pub mod config;
pub mod entry;
pub mod event;
pub mod state;
pub mod traits;
pub mod transcript;

pub use config::{ClientConfig, ReconnectPolicy, UnknownKindPolicy};
pub use entry::{EntryId, EntryKind, TranscriptEntry};
pub use event::{EventKind, InboundEvent};
pub use state::{Closure, ConnectionPhase, QueryCycle, SessionState};
pub use traits::{Connection, Connector, TransportError};
pub use transcript::{Appended, Transcript, TranscriptUpdate};
