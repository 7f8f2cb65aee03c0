//! Debate Arena viewer gateway: REST control surface and WebSocket fan-out.

pub mod error;
pub mod gateway;
pub mod routes;

use axum::Router;
use axum::routing::{get, post};
use debatearena_core::DebateOrchestrator;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: DebateOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: DebateOrchestrator) -> Self {
        Self { orchestrator }
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/debate", get(routes::get_debate))
        .route("/api/debate/start", post(routes::start_debate))
        .route("/api/debate/stop", post(routes::stop_debate))
        .route("/api/chat", post(routes::post_chat))
        .route("/health", get(routes::health))
        .route("/ws", get(gateway::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
