use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::session::{SessionError, SessionStore};
use crate::ws::Identity;

/// Claims of a session token issued by the login service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session identity
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Load or generate the session signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/session_secret and shared with the
/// login service that issues the tokens.
pub fn load_or_generate_session_secret(
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("session_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("Session signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("Session key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("Session signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Validate a session token and return its claims.
pub fn validate_session_token(
    secret: &[u8],
    token: &str,
) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

/// Session store backed by HS256 tokens in the session cookie.
///
/// Tokens are self-contained, so revocation is a local denylist kept until
/// each revoked token would have expired anyway.
pub struct JwtSessionStore {
    secret: Vec<u8>,
    revoked: DashMap<String, i64>,
}

impl JwtSessionStore {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            revoked: DashMap::new(),
        }
    }

    fn claims(&self, token: &str) -> Option<SessionClaims> {
        match validate_session_token(&self.secret, token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "expired",
                    _ => "invalid",
                };
                tracing::debug!(reason, "Session token rejected");
                None
            }
        }
    }
}

#[async_trait]
impl SessionStore for JwtSessionStore {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        if self.revoked.contains_key(token) {
            tracing::debug!("Session token revoked");
            return Ok(None);
        }
        Ok(self.claims(token).map(|claims| Identity::from(claims.sub)))
    }

    async fn revoke(&self, token: &str) -> Result<Option<Identity>, SessionError> {
        if self.revoked.contains_key(token) {
            return Ok(None);
        }
        let Some(claims) = self.claims(token) else {
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        self.revoked.retain(|_, exp| *exp > now);
        self.revoked.insert(token.to_string(), claims.exp);

        Ok(Some(Identity::from(claims.sub)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn token(sub: &str, exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: sub.to_string(),
            iat: now,
            exp: now + exp_offset,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_resolves_to_subject() {
        let store = JwtSessionStore::new(SECRET.to_vec());
        let identity = store.resolve(&token("u1", 900)).await.unwrap();
        assert_eq!(identity, Some(Identity::from("u1")));
    }

    #[tokio::test]
    async fn test_expired_and_forged_tokens_do_not_resolve() {
        let store = JwtSessionStore::new(SECRET.to_vec());
        assert_eq!(store.resolve(&token("u1", -3600)).await.unwrap(), None);

        let forged = {
            let now = Utc::now().timestamp();
            let claims = SessionClaims {
                sub: "u1".to_string(),
                iat: now,
                exp: now + 900,
            };
            encode(
                &Header::default(),
                &claims,
                &EncodingKey::from_secret(b"another-secret-another-secret-00"),
            )
            .unwrap()
        };
        assert_eq!(store.resolve(&forged).await.unwrap(), None);
        assert_eq!(store.resolve("not-a-jwt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revoked_token_no_longer_resolves() {
        let store = JwtSessionStore::new(SECRET.to_vec());
        let tok = token("u1", 900);

        assert_eq!(store.revoke(&tok).await.unwrap(), Some(Identity::from("u1")));
        assert_eq!(store.resolve(&tok).await.unwrap(), None);
        assert_eq!(store.revoke(&tok).await.unwrap(), None);
    }

    #[test]
    fn test_secret_is_generated_then_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").to_str().unwrap().to_string();

        let first = load_or_generate_session_secret(&data_dir).unwrap();
        let second = load_or_generate_session_secret(&data_dir).unwrap();

        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }
}
