//! Public session façade.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use agent_trace_core::{ClientConfig, ConnectionPhase, Connector, SessionState, TranscriptUpdate};
use agent_trace_transport::{ConnectionEvent, ConnectionManager};
use futures::stream::BoxStream;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::machine::{SessionMachine, SubmitError};

struct Shared {
    machine: Mutex<SessionMachine>,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, machine: &SessionMachine) {
        self.state.send_replace(machine.snapshot());
    }
}

/// Streaming session client.
///
/// Owns its connection. Every input (submission, inbound frame, phase
/// change) is applied to the session under one lock, one at a time, and a
/// fresh [`SessionState`] is published after each.
pub struct SessionController<C: Connector> {
    shared: Arc<Shared>,
    connection: ConnectionManager<C>,
    pump: JoinHandle<()>,
}

impl<C: Connector> SessionController<C> {
    /// Create a session and start connecting to `config.url`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn connect(connector: C, config: &ClientConfig) -> Self {
        let machine = SessionMachine::new(config.unknown_kinds);
        let (state, _) = watch::channel(machine.snapshot());
        let shared = Arc::new(Shared {
            machine: Mutex::new(machine),
            state,
        });

        let (mut connection, events) = ConnectionManager::new(connector, config);
        let pump = tokio::spawn(pump_events(Arc::clone(&shared), events));
        connection.open();

        tracing::info!("Session started for {}", config.url);
        Self {
            shared,
            connection,
            pump,
        }
    }

    /// Submit a query.
    ///
    /// Returns immediately; results arrive asynchronously.
    ///
    /// # Errors
    /// Rejects empty text, a closed connection, or a query already in
    /// flight. Rejections change nothing and send nothing.
    pub fn submit_query(&self, text: &str) -> Result<(), SubmitError> {
        let mut machine = self.shared.lock();
        let result = machine.submit(text, |query| {
            self.connection.send(query).map_err(SubmitError::from)
        });

        match result {
            Ok(()) => {
                tracing::debug!("Query submitted");
                self.shared.publish(&machine);
            }
            Err(e) => tracing::debug!("Query rejected: {e}"),
        }
        result
    }

    /// Empty the transcript and end loading. The connection is untouched.
    pub fn clear_session(&self) {
        let mut machine = self.shared.lock();
        machine.clear();
        self.shared.publish(&machine);
    }

    /// Current snapshot.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified after every change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Existing entries followed by live transcript updates.
    #[must_use]
    pub fn transcript_stream(&self) -> BoxStream<'static, TranscriptUpdate> {
        self.shared.lock().transcript_stream()
    }

    /// Phase as seen by the connection itself.
    #[must_use]
    pub fn connection_phase(&self) -> ConnectionPhase {
        self.connection.phase()
    }

    /// Reconnect after the connection gave up. No-op while it is running.
    pub fn reconnect(&mut self) {
        self.connection.open();
    }

    /// Close the connection, cancel pending reconnects and stop processing
    /// events. The final state stays readable through earlier receivers.
    pub async fn dispose(self) {
        let Self {
            shared,
            mut connection,
            pump,
        } = self;

        connection.close().await;
        drop(connection);
        if let Err(e) = pump.await {
            tracing::error!("Session event pump failed: {e}");
        }

        tracing::info!(
            "Session disposed with {} entries",
            shared.state.borrow().entry_count()
        );
    }
}

async fn pump_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let mut machine = shared.lock();
        match event {
            ConnectionEvent::Phase(phase) => machine.on_phase(phase),
            ConnectionEvent::Frame(raw) => {
                machine.on_frame(&raw);
            }
            ConnectionEvent::Error(e) => {
                machine.on_transport_error(&e);
            }
        }
        shared.publish(&machine);
    }
}
