//! API route definitions

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use atp_core::SandboxExecutor;

use crate::api::handlers;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SandboxExecutor>,
}

/// Build the complete API router
pub fn create_router(engine: Arc<SandboxExecutor>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/executions", post(handlers::submit))
        .route("/api/v1/executions/:id", get(handlers::status))
        .route("/api/v1/executions/:id/resume", post(handlers::resume))
        .route("/api/v1/executions/:id/cancel", post(handlers::cancel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
