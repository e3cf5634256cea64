use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::handlers;
use crate::protocol::*;
use crate::state::{ClientId, DaemonState};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle a single client connection
pub async fn handle_client<S>(stream: S, peer: String, state: Arc<DaemonState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!("Client connected: {peer}");

    let (client_id, event_rx) = state.register_client().await;
    debug!("Assigned client_id={client_id} to {peer}");

    let result = handle_client_inner(stream, state.clone(), client_id, event_rx).await;

    if let Err(e) = result {
        debug!("Client {peer} error: {e}");
    }

    let subscriptions = state.subscription_count(client_id).await;
    info!("Client disconnected: {peer} (active subscriptions={subscriptions})");
    state.unregister_client(client_id).await;
}

async fn handle_client_inner<S>(
    stream: S,
    state: Arc<DaemonState>,
    client_id: ClientId,
    mut event_rx: mpsc::UnboundedReceiver<String>,
) -> Result<(), String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Auth phase
    if state.token.is_some() {
        match timeout(AUTH_TIMEOUT, wait_for_auth(&mut reader, &mut writer, &state)).await {
            Ok(Ok(())) => debug!("Client {client_id} authenticated"),
            Ok(Err(e)) => {
                debug!("Auth error: {e}");
                return Err(e);
            }
            Err(_) => {
                warn!("Auth timeout for client {client_id}");
                return Err("Auth timeout".to_string());
            }
        }
    }

    // Main loop: read requests and forward events
    loop {
        tokio::select! {
            // Read request from client
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            let response = process_request(trimmed, state.clone(), client_id).await;
                            if let Err(e) = write_line(&mut writer, &response).await {
                                error!("Failed to write response: {e}");
                                break;
                            }
                        }
                        line.clear();
                    }
                    Err(e) => {
                        debug!("Read error: {e}");
                        break;
                    }
                }
            }

            // Forward events to client
            Some(event) = event_rx.recv() => {
                if let Err(e) = write_line(&mut writer, &event).await {
                    error!("Failed to write event: {e}");
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Read requests until a successful auth. Anything else is refused.
async fn wait_for_auth<R, W>(
    reader: &mut BufReader<R>,
    writer: &mut W,
    state: &DaemonState,
) -> Result<(), String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return Err("Connection closed".to_string()),
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let request: Request = match serde_json::from_str(trimmed) {
                    Ok(r) => r,
                    Err(e) => {
                        let resp = failure(0, INVALID_PARAMS, format!("Invalid JSON: {e}"));
                        let _ = write_line(writer, &resp).await;
                        continue;
                    }
                };

                if request.method == METHOD_AUTH {
                    let outcome = handlers::auth::authenticate(&request, state);
                    let _ = write_line(writer, &outcome.response).await;
                    if outcome.ok {
                        return Ok(());
                    }
                    // Auth failed, allow retry
                } else {
                    let resp = failure(
                        request.id,
                        AUTH_REQUIRED,
                        "Authentication required. Send auth request first.",
                    );
                    let _ = write_line(writer, &resp).await;
                }
            }
            Err(e) => return Err(format!("Read error: {e}")),
        }
    }
}

/// Process a single request and return JSON response
async fn process_request(line: &str, state: Arc<DaemonState>, client_id: ClientId) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return failure(0, INVALID_PARAMS, format!("Invalid JSON: {e}")),
    };

    handlers::dispatch(&request, state, client_id).await
}
