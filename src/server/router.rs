use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;

use super::state::RelayState;
use super::ws;

pub const STATUS_LINE: &str = "roundcast relay is running.";

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler(State(state): State<RelayState>, upgrade: Option<WebSocketUpgrade>) -> Response {
    match upgrade {
        Some(upgrade) => ws::upgrade(upgrade, state),
        None => STATUS_LINE.into_response(),
    }
}

async fn ws_handler(State(state): State<RelayState>, upgrade: WebSocketUpgrade) -> Response {
    ws::upgrade(upgrade, state)
}

async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.health_report().await)
}
