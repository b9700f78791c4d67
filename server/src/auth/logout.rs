use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::auth::session::session_token;
use crate::state::AppState;
use crate::ws::CLOSE_LOGGED_OUT;

/// DELETE /logout
/// Destroys the caller's session and closes that identity's socket, if any.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(token) = session_token(&headers, state.gate.cookie_name()) else {
        return Ok(login_first());
    };

    let identity = match state.sessions.revoke(&token).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return Ok(login_first()),
        Err(err) => {
            tracing::error!(error = %err, "Failed to destroy session");
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "result": "ERROR", "message": "Session store unavailable" })),
            ));
        }
    };

    tracing::info!(identity = %identity, "Session destroyed");

    match state.registry.get(&identity) {
        Some(connection) => {
            connection.close(CLOSE_LOGGED_OUT, "Logged out");
        }
        None => {
            tracing::debug!(identity = %identity, "No socket stored for logged out user");
        }
    }

    Ok(Json(json!({ "result": "OK", "message": "Session destroyed" })))
}

fn login_first() -> Json<Value> {
    Json(json!({ "result": "OK", "message": "User must login first" }))
}
