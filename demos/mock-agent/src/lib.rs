//! Scripted agent endpoint.
//!
//! Each WebSocket connection carries exactly one query: the agent reads one
//! text frame, streams its reasoning steps as records, sends `end` (or a
//! single `error`), and closes the socket.

use std::{sync::Arc, time::Duration};

use agent_trace_transport::ServerRecord;
use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Path the agent listens on.
pub const QUERY_PATH: &str = "/ws/query";

/// How the scripted agent behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentScript {
    /// Pause before each streamed record.
    pub step_delay: Duration,
}

/// Router serving the agent at [`QUERY_PATH`].
pub fn router(script: AgentScript) -> Router {
    Router::new()
        .route(QUERY_PATH, get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(script))
}

/// Serve the agent on `listener` until the process exits.
///
/// # Errors
/// Returns error if the server fails.
pub async fn serve(listener: tokio::net::TcpListener, script: AgentScript) -> std::io::Result<()> {
    axum::serve(listener, router(script)).await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(script): State<Arc<AgentScript>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, *script))
}

async fn handle_socket(socket: WebSocket, script: AgentScript) {
    let (mut sender, mut receiver) = socket.split();

    let query = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => break text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => break text,
                Err(_) => continue,
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::error!("WebSocket error: {e}");
                return;
            }
        }
    };
    tracing::info!("Query received: {query}");

    for record in respond(&query) {
        tokio::time::sleep(script.step_delay).await;
        let frame = match record.to_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::error!("Failed to serialize record: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(frame.into())).await.is_err() {
            tracing::warn!("Client went away mid-stream");
            return;
        }
    }

    let _ = sender.close().await;
}

/// Records streamed in answer to `query`, ending with `end` or `error`.
#[must_use]
pub fn respond(query: &str) -> Vec<ServerRecord> {
    let question = query.trim().trim_end_matches('?').trim();

    if question.to_ascii_lowercase().starts_with("fail") {
        return vec![
            ServerRecord::other(format!("Planning: {question}")),
            ServerRecord::error(
                "Agent run failed",
                Some(format!("Traceback: simulated failure for {question:?}")),
            ),
        ];
    }

    let Some((lhs, op, rhs)) = parse_arithmetic(question) else {
        return vec![
            ServerRecord::ai(format!("Thinking about: {question}")),
            ServerRecord::ai("I can only answer arithmetic questions such as 2+2."),
            ServerRecord::end(),
        ];
    };

    let mut records = vec![
        ServerRecord::ai("computing"),
        ServerRecord::other(format!("calling tool {}({lhs}, {rhs})", tool_name(op))),
    ];
    match evaluate(lhs, op, rhs) {
        Ok(value) => {
            records.push(ServerRecord::tool_result(value.to_string()));
            records.push(ServerRecord::ai(format!("The answer is {value}")));
            records.push(ServerRecord::end());
        }
        Err(detail) => records.push(ServerRecord::error(detail, None)),
    }
    records
}

fn parse_arithmetic(question: &str) -> Option<(f64, char, f64)> {
    // Skip the first character so a leading sign stays with the operand.
    let (idx, op) = question
        .char_indices()
        .skip(1)
        .find(|(_, c)| matches!(c, '+' | '-' | '*' | '/'))?;
    let lhs = question[..idx].trim().parse().ok()?;
    let rhs = question[idx + op.len_utf8()..].trim().parse().ok()?;
    Some((lhs, op, rhs))
}

const fn tool_name(op: char) -> &'static str {
    match op {
        '+' => "add",
        '-' => "subtract",
        '*' => "multiply",
        _ => "divide",
    }
}

fn evaluate(lhs: f64, op: char, rhs: f64) -> Result<f64, String> {
    match op {
        '+' => Ok(lhs + rhs),
        '-' => Ok(lhs - rhs),
        '*' => Ok(lhs * rhs),
        '/' if rhs == 0.0 => Err("Tool divide failed: division by zero".to_string()),
        '/' => Ok(lhs / rhs),
        other => Err(format!("Unsupported operator {other}")),
    }
}
