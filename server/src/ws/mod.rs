pub mod actor;
pub mod dispatch;
pub mod gate;
pub mod handler;
pub mod protocol;
pub mod registry;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

pub use dispatch::{Delivery, DispatchCounts, NotificationDispatcher, NotificationKind};
pub use gate::{GateDecision, RejectReason, SessionGate};
pub use registry::{ConnectionRegistry, Entries};

/// Type alias for the sender half of a WebSocket connection's channel.
/// The writer task owns the receiving half and forwards into the socket sink.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Close code sent when the keepalive times out or the server shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code sent to a connection replaced by a newer one for the same identity.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// Close code sent when the identity's session is destroyed by logout.
pub const CLOSE_LOGGED_OUT: u16 = 4001;

/// Opaque authenticated identity. The registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Readiness of a connection's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a send to a connection did not go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection is {0}, not open")]
    NotOpen(ReadyState),
    #[error("connection writer has shut down")]
    ChannelClosed,
}

/// Policy applied when an identity registers while it already has a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Close the displaced connection with [`CLOSE_SUPERSEDED`].
    #[default]
    CloseSuperseded,
    /// Overwrite the entry and leave the displaced connection open but unreachable.
    Replace,
}

/// Timeouts and policies for the upgrade gate and connection actors.
#[derive(Debug, Clone)]
pub struct SocketSettings {
    /// Cookie carrying the session token
    pub session_cookie: String,
    /// Upper bound on session resolution before the upgrade is refused
    pub session_timeout: Duration,
    /// Interval between server pings
    pub ping_interval: Duration,
    /// Time allowed for a pong after each ping
    pub pong_timeout: Duration,
    /// Time allowed for the peer's close frame after a local close
    pub close_timeout: Duration,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            session_cookie: "session".to_string(),
            session_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            duplicate_policy: DuplicatePolicy::CloseSuperseded,
        }
    }
}

/// Handle to one upgraded WebSocket. Clones share the same transport.
///
/// The identity a connection serves lives in the registry key, not here.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: Uuid,
    tx: ConnectionSender,
    state: AtomicU8,
    connected_at: DateTime<Utc>,
    close_signal: Notify,
}

impl Connection {
    /// Wrap the outbound channel of a freshly upgraded socket. Starts in `Connecting`.
    pub fn new(tx: ConnectionSender) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::now_v7(),
                tx,
                state: AtomicU8::new(ReadyState::Connecting as u8),
                connected_at: Utc::now(),
                close_signal: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// `Connecting -> Open`. Returns false if the connection already moved on.
    pub fn mark_open(&self) -> bool {
        self.transition(ReadyState::Connecting, ReadyState::Open)
    }

    /// Any state -> `Closing`, unless already closing or closed.
    pub fn mark_closing(&self) -> bool {
        self.transition(ReadyState::Connecting, ReadyState::Closing)
            || self.transition(ReadyState::Open, ReadyState::Closing)
    }

    pub fn mark_closed(&self) {
        self.inner
            .state
            .store(ReadyState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queue a text frame. Fails unless the connection is `Open`.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        let text: String = text.into();
        self.send(Message::Text(text.into()))
    }

    /// Queue a frame. Fails unless the connection is `Open`.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(SendError::NotOpen(state));
        }
        self.inner
            .tx
            .send(msg)
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Start a server-initiated close: queue a Close frame and wake the owning actor,
    /// which then waits a bounded time for the peer before dropping the transport.
    ///
    /// Returns false if the connection was already closing or closed.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        if !self.mark_closing() {
            return false;
        }
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = self.inner.tx.send(Message::Close(Some(frame)));
        self.inner.close_signal.notify_one();
        true
    }

    /// Resolves once [`Connection::close`] has been called on any clone.
    pub async fn closing(&self) {
        self.inner.close_signal.notified().await;
    }

    /// Whether both handles refer to the same transport.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.ready_state())
            .finish()
    }
}
