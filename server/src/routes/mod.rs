//! HTTP route definitions.

mod health;
mod sessions;
mod stores;
mod websocket;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(sessions::routes())
        .merge(stores::routes())
        .merge(websocket::routes())
}
