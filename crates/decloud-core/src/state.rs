//! Migration state.
//!
//! Plain data describing one migration run and its per-category progress.
//! The synchronized owner of this data is [`MigrationRecord`](crate::MigrationRecord);
//! everything here is a value that can be cloned out as a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a migration or of one of its categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Accepted but not started.
    Pending,
    /// Executor is running.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an execution error.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl MigrationStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Running => write!(f, "running"),
            MigrationStatus::Completed => write!(f, "completed"),
            MigrationStatus::Failed => write!(f, "failed"),
            MigrationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The most recently reported phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseMarker {
    /// Phase name.
    pub name: String,
    /// 1-based ordinal.
    pub index: usize,
    /// Number of phases the executor declared.
    pub total: usize,
}

/// Item and byte counters reported alongside progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCounters {
    /// Number of items to process, when known.
    pub items_total: u64,
    /// Number of items processed so far.
    pub items_completed: u64,
    /// Number of bytes to transfer, when known.
    pub bytes_total: u64,
    /// Number of bytes transferred so far.
    pub bytes_transferred: u64,
    /// Label of the item being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
}

/// Progress of one category of a composite migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryProgress {
    /// Lifecycle state of this category.
    pub status: MigrationStatus,
    /// Fractional completion in `[0, 1]`.
    pub progress: f64,
    /// Item and byte counters.
    #[serde(flatten)]
    pub counters: ProgressCounters,
    /// Most recently reported phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<PhaseMarker>,
    /// Accumulated error messages.
    pub errors: Vec<String>,
    /// When the category's executor started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the category reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CategoryProgress {
    /// Create a pending entry.
    pub fn new() -> Self {
        Self {
            status: MigrationStatus::Pending,
            progress: 0.0,
            counters: ProgressCounters::default(),
            current_phase: None,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the category as started. Returns `false` unless it was pending.
    pub fn start(&mut self) -> bool {
        if self.status != MigrationStatus::Pending {
            return false;
        }
        self.status = MigrationStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Move to a terminal state. The first terminal transition wins.
    pub fn finish(&mut self, status: MigrationStatus, error: Option<String>) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        if status == MigrationStatus::Completed {
            self.progress = 1.0;
        }
        if let Some(error) = error {
            self.errors.push(error);
        }
        true
    }

    /// Progress as a percentage.
    pub fn percent_complete(&self) -> f64 {
        self.progress * 100.0
    }
}

impl Default for CategoryProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    /// Unique migration id.
    pub id: String,
    /// Executor type, or `composite` for multi-category runs.
    pub migration_type: String,
    /// Current lifecycle state.
    pub status: MigrationStatus,
    /// When the request was accepted.
    pub created_at: DateTime<Utc>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Linear extrapolation of the completion time.
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Most recently reported phase.
    pub current_phase: Option<PhaseMarker>,
    /// Category of the most recent event.
    pub current_category: Option<String>,
    /// Fractional completion of a single-category run.
    pub progress: f64,
    /// Counters of a single-category run.
    pub counters: ProgressCounters,
    /// Per-category progress of a composite run.
    pub category_progress: HashMap<String, CategoryProgress>,
    /// Error text of a failed run.
    pub error: Option<String>,
    /// Whether cancellation has been requested.
    pub cancel_requested: bool,
}

impl Migration {
    /// Create a pending migration.
    pub fn new(id: impl Into<String>, migration_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            migration_type: migration_type.into(),
            status: MigrationStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_completion: None,
            current_phase: None,
            current_category: None,
            progress: 0.0,
            counters: ProgressCounters::default(),
            category_progress: HashMap::new(),
            error: None,
            cancel_requested: false,
        }
    }

    /// Whether this run spans several categories.
    pub fn is_composite(&self) -> bool {
        !self.category_progress.is_empty()
    }

    /// Pending → Running. Returns `false` for any other starting state.
    pub fn start(&mut self) -> bool {
        if self.status != MigrationStatus::Pending {
            return false;
        }
        self.status = MigrationStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Move to a terminal state. The first terminal transition wins; later
    /// calls are no-ops and return `false`.
    pub fn finish(&mut self, status: MigrationStatus, error: Option<String>) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.estimated_completion = None;
        if status == MigrationStatus::Completed && !self.is_composite() {
            self.progress = 1.0;
        }
        if error.is_some() {
            self.error = error;
        }
        true
    }

    /// Check if the migration is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Overall fractional completion.
    ///
    /// Composite runs report the equal-weighted mean over their enabled
    /// categories; single runs report their own progress.
    pub fn overall_progress(&self) -> f64 {
        if self.category_progress.is_empty() {
            return self.progress;
        }
        let sum: f64 = self.category_progress.values().map(|c| c.progress).sum();
        sum / self.category_progress.len() as f64
    }

    /// Wall-clock duration of the run so far (or in total, once terminal).
    pub fn duration(&self) -> chrono::Duration {
        match self.started_at {
            Some(started) => self.completed_at.unwrap_or_else(Utc::now) - started,
            None => chrono::Duration::zero(),
        }
    }

    /// Recompute the estimated completion from elapsed time and progress.
    pub fn refresh_estimate(&mut self) {
        let progress = self.overall_progress();
        self.estimated_completion = match self.started_at {
            Some(started) if !self.is_terminal() && progress > 0.0 && progress < 1.0 => {
                let elapsed = (Utc::now() - started).num_milliseconds() as f64;
                let total = elapsed / progress;
                // Far-off estimates from tiny fractions overflow chrono's range.
                if total.is_finite() && total < i64::MAX as f64 {
                    chrono::Duration::try_milliseconds(total as i64)
                        .and_then(|total| started.checked_add_signed(total))
                } else {
                    None
                }
            }
            _ => None,
        };
    }

    /// One-line description of the outcome.
    pub fn summary(&self) -> String {
        if self.category_progress.is_empty() {
            return format!("{} migration {}", self.migration_type, self.status);
        }

        let mut counts: Vec<(MigrationStatus, usize)> = Vec::new();
        for progress in self.category_progress.values() {
            match counts.iter_mut().find(|(s, _)| *s == progress.status) {
                Some((_, n)) => *n += 1,
                None => counts.push((progress.status, 1)),
            }
        }
        counts.sort_by_key(|(s, _)| *s as u8);

        let parts: Vec<String> = counts.iter().map(|(s, n)| format!("{n} {s}")).collect();
        format!(
            "{} categories: {}",
            self.category_progress.len(),
            parts.join(", ")
        )
    }
}
