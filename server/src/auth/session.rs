//! Session lookup: the seam between the upgrade gate and whatever system owns logins.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use dashmap::DashMap;

use crate::ws::Identity;

/// Failure inside a session backend (not "no session", which is `Ok(None)`).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session backend unavailable: {0}")]
    Unavailable(String),
}

/// Resolves and revokes session tokens carried in the session cookie.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Identity owning `token`, or `None` for unknown, expired or revoked sessions.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, SessionError>;

    /// Destroy the session behind `token`. Returns the identity it belonged to.
    async fn revoke(&self, token: &str) -> Result<Option<Identity>, SessionError>;
}

/// In-process session table: token -> identity.
/// Used when the login system runs in the same process, and in tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Identity>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.sessions.insert(token.into(), identity);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        Ok(self.sessions.get(token).map(|entry| entry.value().clone()))
    }

    async fn revoke(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        Ok(self.sessions.remove(token).map(|(_, identity)| identity))
    }
}

/// Extract the value of cookie `name` from all `Cookie` headers.
pub fn session_token(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().trim_matches('"').to_string())
        })
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookies(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(header::COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_session_token_found_among_other_cookies() {
        let headers = headers_with_cookies(&["theme=dark; session=abc123; lang=en"]);
        assert_eq!(session_token(&headers, "session").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_session_token_across_multiple_headers_and_quotes() {
        let headers = headers_with_cookies(&["theme=dark", "session=\"xyz\""]);
        assert_eq!(session_token(&headers, "session").as_deref(), Some("xyz"));
    }

    #[test]
    fn test_session_token_missing_or_empty() {
        assert!(session_token(&HeaderMap::new(), "session").is_none());
        let headers = headers_with_cookies(&["session=; sessionx=1"]);
        assert!(session_token(&headers, "session").is_none());
    }

    #[tokio::test]
    async fn test_memory_store_resolve_and_revoke() {
        let store = MemorySessionStore::new();
        store.insert("tok", Identity::from("u1"));

        assert_eq!(store.resolve("tok").await.unwrap(), Some(Identity::from("u1")));
        assert_eq!(store.resolve("other").await.unwrap(), None);

        assert_eq!(store.revoke("tok").await.unwrap(), Some(Identity::from("u1")));
        assert_eq!(store.resolve("tok").await.unwrap(), None);
        assert_eq!(store.revoke("tok").await.unwrap(), None);
        assert!(store.is_empty());
    }
}
