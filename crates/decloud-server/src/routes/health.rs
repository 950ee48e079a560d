//! Health check and type listing.

use axum::{extract::State, routing::get, Json, Router};

use crate::json::{HealthResponse, TypesResponse};
use crate::AppState;

/// Health and catalog routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/migration-types", get(list_types))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        migration_types: state.orchestrator.types().len(),
        migrations: state.orchestrator.len(),
    })
}

/// Registered types with their phase lists.
async fn list_types(State(state): State<AppState>) -> Json<TypesResponse> {
    Json(TypesResponse {
        types: state.orchestrator.types(),
    })
}
