//! WebSocket handler for live session events.
//!
//! Handles WebSocket connections, forwards session events the connection
//! subscribed to, and dispatches cancel and resolve requests to the
//! [`SyncService`].

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::service::SyncService;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    service: Arc<SyncService>,
    conn_manager: Arc<ConnectionManager>,
    client: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(client.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        "WebSocket client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &service, &conn_manager, &conn_id);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return a server response.
pub fn process_message(
    text: &str,
    service: &SyncService,
    conn_manager: &ConnectionManager,
    conn_id: &str,
) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Subscribe { session_id } => {
            match conn_manager.subscribe(conn_id, session_id.clone()) {
                Some(sub) => ServerMessage::Subscribed {
                    session_id,
                    all: sub.all,
                },
                None => ServerMessage::error("Connection is not registered", None),
            }
        }

        ClientMessage::Unsubscribe { session_id } => {
            match conn_manager.unsubscribe(conn_id, session_id.as_deref()) {
                Some(sub) => ServerMessage::Subscribed {
                    session_id: None,
                    all: sub.all,
                },
                None => ServerMessage::error("Connection is not registered", None),
            }
        }

        ClientMessage::Cancel {
            session_id,
            request_id,
        } => match service.cancel(&session_id) {
            Ok(_) => ServerMessage::Ack { request_id },
            Err(e) => error_message(e.into(), request_id),
        },

        ClientMessage::Resolve {
            session_id,
            book_id,
            choice,
            request_id,
        } => match service.resolve_pending(&session_id, &book_id, choice) {
            Ok(()) => ServerMessage::Ack { request_id },
            Err(e) => error_message(e.into(), request_id),
        },

        ClientMessage::Ping => ServerMessage::Pong,
    }
}

fn error_message(err: AppError, request_id: Option<String>) -> ServerMessage {
    let code = match &err {
        AppError::Sync(e) => Some(e.code()),
        _ => None,
    };
    ServerMessage::Error {
        message: err.to_string(),
        code,
        request_id,
    }
}
