//! JSON request and response types for the HTTP server.

use decloud_core::{MigrationStatus, MigrationTypeInfo, StatusReport};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of registered migration types.
    pub migration_types: usize,
    /// Number of retained migrations.
    pub migrations: usize,
}

/// Registered migration types.
#[derive(Debug, Serialize)]
pub struct TypesResponse {
    pub types: Vec<MigrationTypeInfo>,
}

/// Every retained migration.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub migrations: Vec<StatusReport>,
}

/// Result of a cancellation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub migration_id: String,
    /// Whether this request set the cancellation flag.
    pub cancel_requested: bool,
    pub status: MigrationStatus,
}
