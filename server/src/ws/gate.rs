//! Upgrade gate: decides, before any handshake response is written, whether a
//! request may become a WebSocket.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use tokio::time::timeout;

use crate::auth::session::{session_token, SessionStore};

use super::Identity;

/// Terminal state of the gate for one upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Accepted(Identity),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No session cookie on the request
    MissingCookie,
    /// Unknown, expired or revoked session
    InvalidSession,
    /// Session backend returned an error
    StoreUnavailable,
    /// Session backend did not answer in time
    Timeout,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCookie => "missing session cookie",
            Self::InvalidSession => "invalid session",
            Self::StoreUnavailable => "session store unavailable",
            Self::Timeout => "session lookup timed out",
        }
    }
}

pub struct SessionGate {
    sessions: Arc<dyn SessionStore>,
    cookie_name: String,
    resolve_timeout: Duration,
}

impl SessionGate {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        cookie_name: impl Into<String>,
        resolve_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            cookie_name: cookie_name.into(),
            resolve_timeout,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Resolve the caller's identity from the session cookie.
    pub async fn admit(&self, headers: &HeaderMap) -> GateDecision {
        let Some(token) = session_token(headers, &self.cookie_name) else {
            return GateDecision::Rejected(RejectReason::MissingCookie);
        };

        match timeout(self.resolve_timeout, self.sessions.resolve(&token)).await {
            Ok(Ok(Some(identity))) => GateDecision::Accepted(identity),
            Ok(Ok(None)) => GateDecision::Rejected(RejectReason::InvalidSession),
            Ok(Err(err)) => {
                tracing::error!(error = %err, "Session lookup failed");
                GateDecision::Rejected(RejectReason::StoreUnavailable)
            }
            Err(_) => GateDecision::Rejected(RejectReason::Timeout),
        }
    }
}
