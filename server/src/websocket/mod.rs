//! WebSocket support for session events.
//!
//! Clients connect via WebSocket to follow progress and state changes of
//! sync sessions, and may cancel sessions or answer pending decisions over
//! the same connection.

mod manager;
mod protocol;

pub use manager::{ConnectionManager, Subscription};
pub use protocol::*;
