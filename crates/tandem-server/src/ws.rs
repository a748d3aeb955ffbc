//! WebSocket endpoint: login handshake and per-connection plumbing.
//!
//! Connections are push-only after authentication: the hub and the
//! federation relays queue frames onto the session sender, and a
//! forwarding task drains the queue into the socket. Clients speak
//! exactly once, to log in.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, Query, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_hub::SEND_QUEUE_DEPTH;
use tandem_types::{wire::evt, Frame, LoginData};

use crate::AppState;

/// Marker peers put in the `type` query parameter when dialing in.
const REMOTE_CONNECTION_TYPE: &str = "remote";

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    /// `type=remote` marks a peer-site link; anything else is a client.
    #[serde(rename = "type")]
    pub connection_type: Option<String>,
}

/// WebSocket handler: `GET /ws` for clients, `GET /ws?type=remote` for
/// peer sites.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let remote = params.connection_type.as_deref() == Some(REMOTE_CONNECTION_TYPE);
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote))
}

/// Handles one WebSocket connection through login, fan-out, and teardown.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote: bool) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    // Bounded per-session queue to keep slow consumers from growing memory;
    // beyond it the broadcast sites drop frames for this connection.
    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE_DEPTH);

    // Forward queued frames from rx to the websocket sender.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut authenticated = false;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                if authenticated {
                    // The stream is push-only once logged in.
                    tracing::debug!(%connection_id, "ignoring frame after login");
                    continue;
                }

                let frame = match Frame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(%connection_id, frame = %text.as_str(), "dropping malformed frame: {e}");
                        continue;
                    }
                };

                if frame.event != evt::LOGIN {
                    reply(&tx, Frame::bad_request());
                    continue;
                }

                let login: LoginData = match serde_json::from_value(frame.data) {
                    Ok(login) => login,
                    Err(e) => {
                        tracing::warn!(%connection_id, "unusable login payload: {e}");
                        reply(&tx, Frame::unauthorized());
                        break;
                    }
                };

                let result = if remote {
                    state
                        .hub
                        .login_remote(connection_id, &login, tx.clone())
                        .await
                } else {
                    state
                        .hub
                        .login_local(connection_id, &login, tx.clone())
                        .await
                };

                match result {
                    Ok(_) => {
                        authenticated = true;
                        reply(&tx, Frame::authe_ok());
                    }
                    Err(e) => {
                        tracing::info!(
                            %connection_id,
                            username = %login.access_key_id,
                            remote,
                            "login rejected: {e}"
                        );
                        reply(&tx, Frame::unauthorized());
                        break;
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    // No-op when the connection never authenticated.
    state.hub.disconnect(connection_id).await;

    // Flush still-queued control frames (a refusal must reach the client
    // before the socket drops), then stop the forwarder.
    drop(tx);
    if tokio::time::timeout(Duration::from_secs(1), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
}

/// Queues a control frame for the client, logging rather than failing when
/// the session queue is saturated.
fn reply(tx: &mpsc::Sender<String>, frame: Frame) {
    match frame.encode() {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to queue control frame: {e}");
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize control frame: {e}");
        }
    }
}
