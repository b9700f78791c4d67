use axum::{
    extract::State,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::auth::logout;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// One row of the connection listing.
#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    pub identity: String,
    pub connection_id: String,
    pub state: &'static str,
    pub connected_at: String,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.len(),
        "notifications": state.dispatcher.stats(),
    }))
}

/// GET /api/connections: snapshot of the registry.
async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionSummary>> {
    let mut rows: Vec<ConnectionSummary> = state
        .registry
        .entries()
        .map(|(identity, connection)| ConnectionSummary {
            identity: identity.to_string(),
            connection_id: connection.id().to_string(),
            state: connection.ready_state().as_str(),
            connected_at: connection.connected_at().to_rfc3339(),
        })
        .collect();
    rows.sort_by(|a, b| a.identity.cmp(&b.identity));
    Json(rows)
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/logout", delete(logout::logout))
        .route("/health", get(health))
        .route("/api/connections", get(list_connections))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
