use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::state::AppState;
use crate::ws::actor;
use crate::ws::gate::GateDecision;

/// GET /ws
/// WebSocket upgrade endpoint. Authenticates via the session cookie before
/// the handshake: rejected requests get a plain 401 and the HTTP connection is
/// closed, so an unauthenticated peer never sees a 101.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match state.gate.admit(&headers).await {
        GateDecision::Accepted(identity) => {
            tracing::info!(identity = %identity, "WebSocket upgrade authenticated");
            ws.on_failed_upgrade(|err| {
                tracing::warn!(error = %err, "WebSocket upgrade failed");
            })
            .on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        GateDecision::Rejected(reason) => {
            tracing::warn!(
                reason = reason.as_str(),
                "Session did not contain a valid user, refusing upgrade"
            );
            (
                StatusCode::UNAUTHORIZED,
                [(header::CONNECTION, "close")],
                reason.as_str(),
            )
                .into_response()
        }
    }
}
