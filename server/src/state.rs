use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::auth::session::SessionStore;
use crate::ws::{
    Connection, ConnectionRegistry, Identity, NotificationDispatcher, SessionGate,
    SocketSettings, CLOSE_GOING_AWAY,
};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Active WebSocket connection per identity
    pub registry: Arc<ConnectionRegistry>,
    /// Notification delivery over the registry
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Upgrade gate (session cookie -> identity)
    pub gate: Arc<SessionGate>,
    /// Session backend shared with the gate, used by logout
    pub sessions: Arc<dyn SessionStore>,
    /// Keepalive, close and duplicate-registration settings
    pub settings: Arc<SocketSettings>,
    /// Connections displaced from the registry but left open (`Replace` policy),
    /// keyed by connection id until their actor exits
    pub superseded: Arc<DashMap<Uuid, (Identity, Connection)>>,
}

impl AppState {
    /// Build a fresh registry and wire the gate and dispatcher to it.
    pub fn new(sessions: Arc<dyn SessionStore>, settings: SocketSettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(registry.clone()));
        let gate = Arc::new(SessionGate::new(
            sessions.clone(),
            settings.session_cookie.clone(),
            settings.session_timeout,
        ));

        Self {
            registry,
            dispatcher,
            gate,
            sessions,
            settings: Arc::new(settings),
            superseded: Arc::new(DashMap::new()),
        }
    }

    /// Close every registered connection, plus any superseded ones still open,
    /// and empty the registry. Returns how many connections were closed.
    pub fn shutdown(&self) -> usize {
        let superseded: Vec<(Identity, Connection)> = self
            .superseded
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.superseded.clear();

        let mut closed = 0;
        for (identity, connection) in self.registry.entries().chain(superseded) {
            if connection.close(CLOSE_GOING_AWAY, "Server shutting down") {
                tracing::debug!(identity = %identity, connection_id = %connection.id(), "Closing connection");
                closed += 1;
            }
        }
        let cleared = self.registry.clear();
        tracing::debug!(closed, cleared, "Connections shut down");
        closed
    }
}
