//! Connection manager with bounded automatic reconnect.

use std::sync::Arc;

use agent_trace_core::{
    ClientConfig, Closure, Connection, ConnectionPhase, Connector, ReconnectPolicy, TransportError,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// Transcript text for a transport failure.
pub const CONNECTION_ERROR_TEXT: &str =
    "Connection error occurred. Please check your network and try again.";

/// Connection manager error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Not connected")]
    NotConnected,
}

/// Notification from the connection, delivered in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The phase changed.
    Phase(ConnectionPhase),
    /// A raw inbound frame.
    Frame(String),
    /// The transport failed. Emitted once per failure.
    Error(TransportError),
}

enum Command {
    Send(String),
    Close,
}

/// How an open connection ended.
enum Ended {
    Requested,
    Dropped(Option<TransportError>),
}

/// Owns one logical connection to the agent endpoint.
///
/// A driver task holds the socket, forwards inbound frames and phase changes
/// to the event channel, and reconnects after unexpected closures according
/// to the [`ReconnectPolicy`]. The driver is the only writer of the phase.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    url: String,
    policy: ReconnectPolicy,
    phase: Arc<watch::Sender<ConnectionPhase>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    driver: Option<JoinHandle<()>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager and the receiver for its events.
    ///
    /// Nothing connects until [`open`](Self::open) is called.
    #[must_use]
    pub fn new(
        connector: C,
        config: &ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(ConnectionPhase::Closed(Closure::Requested));

        let manager = Self {
            connector: Arc::new(connector),
            url: config.url.clone(),
            policy: config.reconnect,
            phase: Arc::new(phase),
            events,
            commands: None,
            driver: None,
        };
        (manager, events_rx)
    }

    /// Start connecting with a fresh attempt budget. No-op while a driver is
    /// still connected, connecting or waiting to reconnect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&mut self) {
        if self.is_running() && !self.phase().is_exhausted() {
            tracing::debug!("Connection to {} already running", self.url);
            return;
        }

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            connector: Arc::clone(&self.connector),
            url: self.url.clone(),
            policy: self.policy,
            phase: Arc::clone(&self.phase),
            events: self.events.clone(),
            commands: commands_rx,
        };

        self.commands = Some(commands);
        self.driver = Some(tokio::spawn(driver.run()));
    }

    /// Send one text frame.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the phase is `Open`. Nothing is queued.
    pub fn send(&self, payload: impl Into<String>) -> Result<(), ConnectionError> {
        if !self.phase().is_open() {
            return Err(ConnectionError::NotConnected);
        }
        self.commands
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?
            .send(Command::Send(payload.into()))
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Close the connection and cancel any pending reconnect.
    pub async fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close);
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::error!("Connection driver failed: {e}");
            }
        }

        let closed = ConnectionPhase::Closed(Closure::Requested);
        if *self.phase.borrow() != closed {
            set_phase(&self.phase, &self.events, closed);
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes phase changes.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.subscribe()
    }

    /// Whether the driver task is alive (connected, connecting or waiting to
    /// reconnect).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| !d.is_finished())
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

fn set_phase(
    phase: &watch::Sender<ConnectionPhase>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    next: ConnectionPhase,
) {
    tracing::debug!("Connection phase -> {next:?}");
    phase.send_replace(next);
    let _ = events.send(ConnectionEvent::Phase(next));
}

struct Driver<C: Connector> {
    connector: Arc<C>,
    url: String,
    policy: ReconnectPolicy,
    phase: Arc<watch::Sender<ConnectionPhase>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self) {
        let mut failures = 0u32;

        loop {
            if self.drain_stale() {
                self.set_phase(ConnectionPhase::Closed(Closure::Requested));
                return;
            }
            self.set_phase(ConnectionPhase::Connecting);

            let connected = {
                let connector = Arc::clone(&self.connector);
                let connect = connector.connect(&self.url);
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        res = &mut connect => break res,
                        cmd = self.commands.recv() => match cmd {
                            Some(Command::Send(_)) => {
                                tracing::warn!("Dropping frame sent while connecting");
                            }
                            Some(Command::Close) | None => {
                                self.set_phase(ConnectionPhase::Closed(Closure::Requested));
                                return;
                            }
                        },
                    }
                }
            };

            match connected {
                Ok(conn) => {
                    tracing::info!("Connected to {}", self.url);
                    failures = 0;
                    self.set_phase(ConnectionPhase::Open);

                    match self.pump(conn).await {
                        Ended::Requested => {
                            tracing::info!("Connection to {} closed", self.url);
                            self.set_phase(ConnectionPhase::Closed(Closure::Requested));
                            return;
                        }
                        Ended::Dropped(None) => {
                            tracing::info!("Connection to {} closed by peer", self.url);
                        }
                        Ended::Dropped(Some(e)) => {
                            tracing::error!("Connection to {} lost: {e}", self.url);
                            let _ = self.events.send(ConnectionEvent::Error(e));
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to connect to {}: {e}", self.url);
                    let _ = self.events.send(ConnectionEvent::Error(e));
                }
            }

            failures += 1;
            let Some(delay) = self.policy.delay_for(failures) else {
                tracing::warn!(
                    "Giving up on {} after {} reconnect attempts",
                    self.url,
                    self.policy.max_attempts
                );
                self.set_phase(ConnectionPhase::Closed(Closure::Exhausted));
                return;
            };

            tracing::warn!(
                "Reconnecting to {} in {delay:?} (attempt {failures}/{})",
                self.url,
                self.policy.max_attempts
            );
            self.set_phase(ConnectionPhase::Closed(Closure::Reconnecting {
                attempt: failures,
            }));

            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    () = &mut backoff => break,
                    cmd = self.commands.recv() => match cmd {
                        Some(Command::Send(_)) => {
                            tracing::warn!("Dropping frame sent while disconnected");
                        }
                        Some(Command::Close) | None => {
                            self.set_phase(ConnectionPhase::Closed(Closure::Requested));
                            return;
                        }
                    },
                }
            }
        }
    }

    /// Forward frames until the connection ends.
    async fn pump(&mut self, mut conn: C::Conn) -> Ended {
        loop {
            tokio::select! {
                frame = conn.next_frame() => match frame {
                    Some(Ok(text)) => {
                        let _ = self.events.send(ConnectionEvent::Frame(text));
                    }
                    Some(Err(e)) => return Ended::Dropped(Some(e)),
                    None => return Ended::Dropped(None),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = conn.send_text(text).await {
                            return Ended::Dropped(Some(e));
                        }
                    }
                    Some(Command::Close) | None => {
                        self.set_phase(ConnectionPhase::Closing);
                        if let Err(e) = conn.close().await {
                            tracing::debug!("Error while closing connection: {e}");
                        }
                        return Ended::Requested;
                    }
                },
            }
        }
    }

    /// Drop frames queued for a connection that no longer exists.
    ///
    /// Returns true if a close was requested meanwhile.
    fn drain_stale(&mut self) -> bool {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Send(_) => tracing::warn!("Dropping frame queued for a lost connection"),
                Command::Close => return true,
            }
        }
        false
    }

    fn set_phase(&self, next: ConnectionPhase) {
        set_phase(&self.phase, &self.events, next);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::{MemoryConnector, MemoryServer};

    fn manager() -> (
        ConnectionManager<MemoryConnector>,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        MemoryServer,
    ) {
        let (connector, server) = MemoryConnector::new();
        let (manager, events) = ConnectionManager::new(connector, &ClientConfig::new("mem://agent"));
        (manager, events, server)
    }

    async fn wait_phase(manager: &ConnectionManager<MemoryConnector>, want: ConnectionPhase) {
        let mut rx = manager.watch_phase();
        rx.wait_for(|p| *p == want).await.unwrap();
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_send_requires_open_connection() {
        let (manager, _events, _server) = manager();
        assert_eq!(manager.send("hi"), Err(ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut manager, mut events, mut server) = manager();
        manager.open();
        let mut peer = server.accept().await.unwrap();
        wait_phase(&manager, ConnectionPhase::Open).await;

        manager.send("2+2?").unwrap();
        assert_eq!(peer.recv_query().await.as_deref(), Some("2+2?"));

        assert!(peer.send_frame(r#"{"type":"ai","content":"4"}"#));
        loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::Frame(f) => {
                    assert_eq!(f, r#"{"type":"ai","content":"4"}"#);
                    break;
                }
                ConnectionEvent::Phase(_) => {}
                ConnectionEvent::Error(e) => panic!("unexpected error {e}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_peer_close() {
        let (mut manager, mut events, mut server) = manager();
        manager.open();
        let peer = server.accept().await.unwrap();
        wait_phase(&manager, ConnectionPhase::Open).await;

        drop(peer);
        let _again = server.accept().await.unwrap();
        wait_phase(&manager, ConnectionPhase::Open).await;
        assert_eq!(server.attempts(), 2);

        let phases: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::Phase(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                ConnectionPhase::Connecting,
                ConnectionPhase::Open,
                ConnectionPhase::Closed(Closure::Reconnecting { attempt: 1 }),
                ConnectionPhase::Connecting,
                ConnectionPhase::Open,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bounded_attempts() {
        let (mut manager, mut events, server) = manager();
        server.refuse_connections(true);
        manager.open();

        wait_phase(&manager, ConnectionPhase::Closed(Closure::Exhausted)).await;
        // Initial attempt plus five reconnects.
        assert_eq!(server.attempts(), 6);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(server.attempts(), 6);
        assert!(!manager.is_running());

        let errors = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, ConnectionEvent::Error(_)))
            .count();
        assert_eq!(errors, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_attempts() {
        let (mut manager, _events, mut server) = manager();
        server.refuse_connections(true);
        manager.open();
        wait_phase(
            &manager,
            ConnectionPhase::Closed(Closure::Reconnecting { attempt: 3 }),
        )
        .await;

        server.refuse_connections(false);
        let peer = server.accept().await.unwrap();
        wait_phase(&manager, ConnectionPhase::Open).await;

        peer.fail("reset by peer");
        wait_phase(
            &manager,
            ConnectionPhase::Closed(Closure::Reconnecting { attempt: 1 }),
        )
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_after_exhaustion_starts_over() {
        let (connector, mut server) = MemoryConnector::new();
        let config = ClientConfig::new("mem://agent").with_reconnect(ReconnectPolicy {
            max_attempts: 1,
            interval: Duration::from_secs(1),
        });
        let (mut manager, _events) = ConnectionManager::new(connector, &config);
        server.refuse_connections(true);
        manager.open();
        wait_phase(&manager, ConnectionPhase::Closed(Closure::Exhausted)).await;
        assert_eq!(server.attempts(), 2);

        server.refuse_connections(false);
        manager.open();
        let peer = server.accept().await.unwrap();
        wait_phase(&manager, ConnectionPhase::Open).await;
        assert_eq!(server.attempts(), 3);
        assert!(manager.is_running());

        peer.fail("reset by peer");
        wait_phase(
            &manager,
            ConnectionPhase::Closed(Closure::Reconnecting { attempt: 1 }),
        )
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_reconnect() {
        let (mut manager, _events, server) = manager();
        server.refuse_connections(true);
        manager.open();
        wait_phase(
            &manager,
            ConnectionPhase::Closed(Closure::Reconnecting { attempt: 1 }),
        )
        .await;

        manager.close().await;
        assert_eq!(manager.phase(), ConnectionPhase::Closed(Closure::Requested));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(server.attempts(), 1);
    }

    #[tokio::test]
    async fn test_close_open_connection() {
        let (mut manager, _events, mut server) = manager();
        manager.open();
        let mut peer = server.accept().await.unwrap();
        wait_phase(&manager, ConnectionPhase::Open).await;

        manager.close().await;
        assert_eq!(manager.phase(), ConnectionPhase::Closed(Closure::Requested));
        assert_eq!(peer.recv_query().await, None);
        assert_eq!(manager.send("late"), Err(ConnectionError::NotConnected));
    }
}
