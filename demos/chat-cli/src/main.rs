//! Line-oriented chat client for a streaming agent.
//!
//! Run with: cargo run -p chat-cli-demo
//!
//! Reads queries from stdin and prints the reasoning trace as it streams.
//! Commands: /clear, /status, /reconnect, /quit. The endpoint comes from
//! AGENT_TRACE_URL (default ws://localhost:8000/ws/query).

use agent_trace_session::{
    ClientConfig, ConnectionPhase, SessionController, SessionState, TranscriptUpdate, WsConnector,
};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let config = ClientConfig::from_env();
    println!("agent@{} - type a question, /quit to exit", config.url);

    let mut session = SessionController::connect(WsConnector, &config);

    let mut updates = session.transcript_stream();
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.next().await {
            match update {
                TranscriptUpdate::Appended(entry) => println!("[{}] {}", entry.kind, entry.text),
                TranscriptUpdate::Finalized(Some(entry)) => {
                    println!("=== Final result ===\n{}", entry.text);
                }
                TranscriptUpdate::Finalized(None) => println!("=== No final result ==="),
                TranscriptUpdate::Cleared => println!("(session cleared)"),
            }
        }
    });

    let mut status = session.watch();
    let status_task = tokio::spawn(async move {
        let mut last = status.borrow().connection_status();
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().connection_status();
            if current != last {
                println!("-- {current}");
                last = current;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/clear" => session.clear_session(),
            "/status" => print_status(&session.state(), session.connection_phase()),
            "/reconnect" => session.reconnect(),
            _ => {
                if let Err(e) = session.submit_query(&line) {
                    tracing::warn!("Query rejected: {e}");
                    println!("! {e}");
                }
            }
        }
    }

    tracing::debug!("Shutting down session");
    session.dispose().await;
    printer.abort();
    status_task.abort();
    Ok(())
}

fn print_status(state: &SessionState, phase: ConnectionPhase) {
    println!(
        "-- {} ({phase:?}) | messages: {} | {}",
        state.connection_status(),
        state.entry_count(),
        if state.is_loading { "running" } else { "idle" }
    );
}
