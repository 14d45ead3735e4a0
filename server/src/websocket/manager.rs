//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and what each one subscribed to, and
//! fans session events out to them.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::ServerMessage;
use crate::session::SessionEvent;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// Which sessions a connection follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub all: bool,
    pub sessions: HashSet<String>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            all: true,
            sessions: HashSet::new(),
        }
    }
}

impl Subscription {
    pub fn matches(&self, session_id: &str) -> bool {
        self.all || self.sessions.contains(session_id)
    }
}

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Label the client connected with
    pub client: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    pub subscription: Subscription,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection. It follows every session until it
    /// subscribes to specific ones.
    ///
    /// Returns the connection ID.
    pub fn register(&self, client: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                client,
                sender,
                subscription: Subscription::default(),
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection, returning it if it was still registered.
    pub fn unregister(&self, conn_id: &str) -> Option<Connection> {
        let (_, conn) = self.connections.remove(conn_id)?;
        tracing::info!(conn_id = %conn.id, client = %conn.client, "WebSocket connection unregistered");
        Some(conn)
    }

    /// Follow one session, or all when `session_id` is `None`.
    pub fn subscribe(&self, conn_id: &str, session_id: Option<String>) -> Option<Subscription> {
        let mut conn = self.connections.get_mut(conn_id)?;
        match session_id {
            Some(id) => {
                conn.subscription.all = false;
                conn.subscription.sessions.insert(id);
            }
            None => conn.subscription.all = true,
        }
        Some(conn.subscription.clone())
    }

    /// Stop following one session, or everything when `session_id` is `None`.
    pub fn unsubscribe(&self, conn_id: &str, session_id: Option<&str>) -> Option<Subscription> {
        let mut conn = self.connections.get_mut(conn_id)?;
        match session_id {
            Some(id) => {
                conn.subscription.sessions.remove(id);
            }
            None => {
                conn.subscription.all = false;
                conn.subscription.sessions.clear();
            }
        }
        Some(conn.subscription.clone())
    }

    /// Send an event to every connection following its session.
    ///
    /// Returns the number of connections that received the message.
    pub fn dispatch(&self, event: &SessionEvent) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.subscription.matches(event.session_id())
                && conn.sender.send(ServerMessage::event(event.clone())).is_ok()
            {
                sent_count += 1;
            }
        }

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Forward every event from `events` to the subscribed connections.
    pub fn spawn_dispatcher(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let sent = self.dispatch(&event);
                        tracing::trace!(session_id = %event.session_id(), recipients = sent, "Event dispatched");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event dispatcher lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn state_changed(session_id: &str) -> SessionEvent {
        SessionEvent::StateChanged {
            session_id: session_id.to_string(),
            from: SessionState::Idle,
            to: SessionState::Preparing,
        }
    }

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("phone".to_string(), tx);
        assert_eq!(manager.connection_count(), 1);

        let removed = manager.unregister(&conn_id).unwrap();
        assert_eq!(removed.id, conn_id);
        assert_eq!(removed.client, "phone");
        assert_eq!(manager.connection_count(), 0);

        assert!(manager.unregister(&conn_id).is_none());
    }

    #[test]
    fn test_dispatch_respects_subscriptions() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let _all = manager.register("dashboard".to_string(), tx1);
        let narrow = manager.register("phone".to_string(), tx2);
        manager.subscribe(&narrow, Some("s-2".to_string()));

        assert_eq!(manager.dispatch(&state_changed("s-1")), 1);
        assert!(matches!(rx1.try_recv().unwrap(), ServerMessage::Event { .. }));
        assert!(rx2.try_recv().is_err());

        assert_eq!(manager.dispatch(&state_changed("s-2")), 2);
        assert!(rx2.try_recv().is_ok());

        let sub = manager.unsubscribe(&narrow, None).unwrap();
        assert!(!sub.all && sub.sessions.is_empty());
        assert_eq!(manager.dispatch(&state_changed("s-2")), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_forwards_broadcast() {
        let manager = ConnectionManager::new_shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register("phone".to_string(), tx);

        let (events, receiver) = broadcast::channel(8);
        let handle = Arc::clone(&manager).spawn_dispatcher(receiver);

        events.send(state_changed("s-1")).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, ServerMessage::event(state_changed("s-1")));

        drop(events);
        handle.await.unwrap();
    }
}
