//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use serde::{Deserialize, Serialize};
use shelfsync_engine::{ErrorCode, StatusChoice};

use crate::session::SessionEvent;

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Receive events of one session, or of all sessions when `session_id`
    /// is absent.
    Subscribe {
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Stop receiving events of one session, or of everything.
    Unsubscribe {
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Cancel a running session.
    Cancel {
        session_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Choose the status of a pending record.
    Resolve {
        session_id: String,
        book_id: String,
        choice: StatusChoice,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A session event the connection subscribed to.
    Event { event: SessionEvent },

    /// Confirms a subscription change.
    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Whether the connection now receives every session's events
        all: bool,
    },

    /// A cancel or resolve request was accepted.
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: None,
            request_id,
        }
    }

    pub fn event(event: SessionEvent) -> Self {
        ServerMessage::Event { event }
    }
}
