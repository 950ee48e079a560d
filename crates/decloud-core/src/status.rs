//! Status query shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state::{CategoryProgress, Migration, MigrationStatus, PhaseMarker};

/// Point-in-time view of a migration, as returned to status pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub migration_id: String,
    #[serde(rename = "type")]
    pub migration_type: String,
    pub status: MigrationStatus,
    /// Fraction in `[0, 1]`.
    pub overall_progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<PhaseMarker>,
    pub category_progress: BTreeMap<String, CategoryProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl From<&Migration> for StatusReport {
    fn from(migration: &Migration) -> Self {
        Self {
            migration_id: migration.id.clone(),
            migration_type: migration.migration_type.clone(),
            status: migration.status,
            overall_progress: migration.overall_progress(),
            current_category: migration.current_category.clone(),
            current_phase: migration.current_phase.clone(),
            category_progress: migration
                .category_progress
                .iter()
                .map(|(name, progress)| (name.clone(), progress.clone()))
                .collect(),
            created_at: migration.created_at,
            started_at: migration.started_at,
            completed_at: migration.completed_at,
            estimated_completion: migration.estimated_completion,
            error: migration.error.clone(),
            cancel_requested: migration.cancel_requested,
        }
    }
}
