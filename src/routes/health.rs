use axum::{extract::State, routing::get, Json, Router};

use crate::llm::provider::ProviderSet;
use crate::models::{AppState, HealthResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = ProviderSet::configured(&state.config.providers)
        .into_iter()
        .map(String::from)
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        store: state.store_backend.to_string(),
        providers,
    })
}
