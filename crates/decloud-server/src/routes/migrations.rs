//! Migration submission, status, cancellation and acknowledgement.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use decloud_core::{MigrationRequest, StatusReport, ValidationResult};

use crate::error::AppError;
use crate::json::{CancelResponse, ListResponse};
use crate::AppState;

/// Migration routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/migrations", post(submit).get(list))
        .route("/migrations/validate", post(validate))
        .route("/migrations/:id", get(status).delete(acknowledge))
        .route("/migrations/:id/cancel", post(cancel))
}

/// Bodies are parsed by hand so shape errors surface as 400, not 422.
fn parse_request(body: serde_json::Value) -> Result<MigrationRequest, AppError> {
    Ok(serde_json::from_value(body)?)
}

/// Validate a request without running it.
async fn validate(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ValidationResult>, AppError> {
    let request = parse_request(body)?;
    let result = state.orchestrator.validate(&request).await?;
    Ok(Json(result))
}

/// Validate, create and start a migration.
async fn submit(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<StatusReport>), AppError> {
    let request = parse_request(body)?;
    let record = state.orchestrator.submit(request).await?;
    Ok((StatusCode::CREATED, Json(record.status_report())))
}

async fn list(State(state): State<AppState>) -> Json<ListResponse> {
    Json(ListResponse {
        migrations: state
            .orchestrator
            .list()
            .iter()
            .map(|record| record.status_report())
            .collect(),
    })
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, AppError> {
    let record = state.orchestrator.get(&id)?;
    Ok(Json(record.status_report()))
}

/// Request cancellation. Repeating the request is harmless.
async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let record = state.orchestrator.get(&id)?;
    let cancel_requested = record.cancel();
    Ok(Json(CancelResponse {
        migration_id: id,
        cancel_requested,
        status: record.status(),
    }))
}

/// Discard a finished migration, returning its final state.
async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, AppError> {
    let migration = state.orchestrator.acknowledge(&id)?;
    Ok(Json(StatusReport::from(&migration)))
}
