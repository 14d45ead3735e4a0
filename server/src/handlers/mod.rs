//! Request handlers for session control.

mod sessions;
mod websocket;

pub use sessions::*;
pub use websocket::*;
