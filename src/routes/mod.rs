//! API Routes
//!
//! This module organizes all HTTP endpoints for the application:
//! - `/api/queries` - Submit text questions, look up jobs
//! - `/api/queries/diagnose` - Submit plant photos (multipart)
//! - `/api/users/{user_id}/queries` - A user's recent jobs
//! - `/api/ws` - Room subscriptions for live results
//! - `/api/health` - Health checks

pub mod health;
pub mod queries;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Uploads larger than this are rejected before reaching a handler.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server);

    Router::new()
        .merge(queries::router(state.clone()))
        .merge(ws::router(state.clone()))
        .merge(health::router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
