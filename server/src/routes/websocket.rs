//! WebSocket endpoint.

use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::handlers::handle_websocket_connection;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Label of the connecting client, used in logs
    pub client: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// GET /ws - Upgrade to a session event stream.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let client = query.client.unwrap_or_else(|| "anonymous".to_string());
    let service = Arc::clone(&state.service);
    let conn_manager = Arc::clone(&state.conn_manager);

    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, service, conn_manager, client)
    })
}
