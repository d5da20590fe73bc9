//! Scripted agent server.
//!
//! Run with: cargo run -p mock-agent-demo
//!
//! Then point the chat client at ws://127.0.0.1:8000/ws/query.

use std::{net::SocketAddr, time::Duration};

use mock_agent_demo::{AgentScript, QUERY_PATH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let step_delay = std::env::var("MOCK_AGENT_STEP_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(Duration::from_millis(400), Duration::from_millis);

    let addr = SocketAddr::from(([127, 0, 0, 1], 8000));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Agent listening on ws://{addr}{QUERY_PATH}");

    mock_agent_demo::serve(listener, AgentScript { step_delay }).await?;
    Ok(())
}
