//! Integration tests for cookie-carried JWT sessions and logout.

use chrono::Utc;
use futures_util::StreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use sockgate_server::auth::jwt::{load_or_generate_session_secret, JwtSessionStore, SessionClaims};
use sockgate_server::state::AppState;
use sockgate_server::ws::{Identity, SocketSettings};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start the server with a JWT session store; returns the signing secret too.
async fn start_test_server() -> (AppState, Vec<u8>, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let secret = load_or_generate_session_secret(&data_dir).expect("Failed to generate secret");

    let settings = SocketSettings {
        close_timeout: Duration::from_millis(300),
        ..SocketSettings::default()
    };
    let state = AppState::new(Arc::new(JwtSessionStore::new(secret.clone())), settings);

    let app = sockgate_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    (state, secret, addr)
}

/// Issue a session token the way the login service would.
fn issue_token(secret: &[u8], identity: &str, ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = SessionClaims {
        sub: identity.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
}

async fn connect(addr: SocketAddr, token: &str) -> Result<WsStream, WsError> {
    let mut request = format!("ws://{}/ws", addr).into_client_request()?;
    request.headers_mut().insert(
        "Cookie",
        HeaderValue::from_str(&format!("session={}", token)).unwrap(),
    );
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn logout(addr: SocketAddr, token: Option<&str>) -> serde_json::Value {
    let mut req = reqwest::Client::new().delete(format!("http://{}/logout", addr));
    if let Some(token) = token {
        req = req.header("Cookie", format!("session={}", token));
    }
    let resp = req.send().await.unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_jwt_session_cookie_upgrades() {
    let (state, secret, addr) = start_test_server().await;
    let token = issue_token(&secret, "jwt-user", 900);

    let mut ws = connect(addr, &token).await.expect("Failed to connect");

    match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            assert_eq!(text.as_str(), "Connection established for user jwt-user.");
        }
        other => panic!("Expected confirmation, got {:?}", other),
    }
    assert!(state.registry.has(&Identity::from("jwt-user")));
}

#[tokio::test]
async fn test_expired_jwt_is_refused() {
    let (state, secret, addr) = start_test_server().await;
    let token = issue_token(&secret, "late-user", -3600);

    match connect(addr, &token).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("Expected 401, got {:?}", other.map(|_| ())),
    }
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_logout_closes_socket_and_revokes_session() {
    let (state, secret, addr) = start_test_server().await;
    let token = issue_token(&secret, "u1", 900);

    let mut ws = connect(addr, &token).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;

    let body = logout(addr, Some(&token)).await;
    assert_eq!(body["result"], "OK");
    assert_eq!(body["message"], "Session destroyed");

    // Socket is closed with the logout code
    let close = loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Close(Some(frame))))) => break frame,
            Ok(Some(Ok(_))) => continue,
            other => panic!("Expected close frame, got {:?}", other),
        }
    };
    assert_eq!(close.code, CloseCode::from(4001));

    assert!(wait_until(|| state.registry.is_empty()).await);

    // The revoked session can no longer upgrade
    match connect(addr, &token).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("Expected 401 after logout, got {:?}", other.map(|_| ())),
    }

    // A second logout with the same cookie finds no session
    let body = logout(addr, Some(&token)).await;
    assert_eq!(body["message"], "User must login first");
}

#[tokio::test]
async fn test_logout_without_session() {
    let (_state, _secret, addr) = start_test_server().await;
    let body = logout(addr, None).await;
    assert_eq!(body["result"], "OK");
    assert_eq!(body["message"], "User must login first");
}

#[tokio::test]
async fn test_logout_without_socket_still_destroys_session() {
    let (state, secret, addr) = start_test_server().await;
    let token = issue_token(&secret, "offline-user", 900);

    let body = logout(addr, Some(&token)).await;
    assert_eq!(body["message"], "Session destroyed");
    assert!(state.registry.is_empty());
}
