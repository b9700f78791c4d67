//! Server-initiated notifications to a single identity's connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::protocol::render_notification;
use super::registry::ConnectionRegistry;
use super::{Connection, Identity, ReadyState, SendError};

/// Kinds of notification the server pushes. Connection close has no message;
/// it only shows up as registry cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ConnectionEstablished,
    MessageReceived,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::MessageReceived => "message_received",
        }
    }
}

/// Outcome of a single `notify` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on an open connection
    Sent,
    /// Connection exists but is not open
    Skipped(ReadyState),
    /// No connection registered for the identity
    NoConnection,
    /// Connection was open but its writer had already gone away
    Failed,
}

/// Counters per delivery outcome.
#[derive(Debug, Default)]
struct DispatchStats {
    sent: AtomicU64,
    skipped: AtomicU64,
    no_connection: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounts {
    pub sent: u64,
    pub skipped: u64,
    pub no_connection: u64,
    pub failed: u64,
}

/// Delivers notifications to the connection registered under an identity.
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    stats: DispatchStats,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: DispatchStats::default(),
        }
    }

    /// Send a `kind` notification to `identity`'s connection if it is open.
    /// Never fails: every outcome is returned, counted, and logged.
    pub fn notify(&self, identity: &Identity, kind: NotificationKind) -> Delivery {
        let Some(connection) = self.registry.get(identity) else {
            self.stats.no_connection.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(identity = %identity, kind = kind.as_str(), "No connection to notify");
            return Delivery::NoConnection;
        };

        self.deliver(identity, &connection, kind)
    }

    /// Send a `kind` notification for `identity` straight to `connection`,
    /// without a registry lookup. Counted like `notify`.
    pub fn deliver(
        &self,
        identity: &Identity,
        connection: &Connection,
        kind: NotificationKind,
    ) -> Delivery {
        match connection.send_text(render_notification(kind, identity)) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    identity = %identity,
                    connection_id = %connection.id(),
                    kind = kind.as_str(),
                    "Notification sent"
                );
                Delivery::Sent
            }
            Err(SendError::NotOpen(state)) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    identity = %identity,
                    connection_id = %connection.id(),
                    kind = kind.as_str(),
                    state = %state,
                    "Notification skipped, connection not open"
                );
                Delivery::Skipped(state)
            }
            Err(SendError::ChannelClosed) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    identity = %identity,
                    connection_id = %connection.id(),
                    kind = kind.as_str(),
                    "Notification failed, writer gone"
                );
                Delivery::Failed
            }
        }
    }

    pub fn stats(&self) -> DispatchCounts {
        DispatchCounts {
            sent: self.stats.sent.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            no_connection: self.stats.no_connection.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}
