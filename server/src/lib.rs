//! Shelfsync Server - sync sessions between book libraries.
//!
//! Runs export → transfer → import → verify sessions between registered
//! stores using the shelfsync-engine merge logic, and exposes them over HTTP
//! and WebSocket.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod ports;
pub mod routes;
pub mod service;
pub mod session;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::service::SyncService;
use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    /// Build the state and start forwarding session events to WebSocket
    /// clients.
    pub fn new(service: Arc<SyncService>, config: Config) -> Self {
        let conn_manager = ConnectionManager::new_shared();
        Arc::clone(&conn_manager).spawn_dispatcher(service.subscribe());

        Self {
            service,
            config: Arc::new(config),
            conn_manager,
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
