//! Live status events.
//!
//! Every call into the emission API becomes one [`MigrationEvent`], stamped
//! with a per-migration sequence number, appended to the record's timeline and
//! broadcast to subscribers. The serialized form is what the reporting channel
//! (e.g. a server-sent event stream) forwards verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::MigrationStatus;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal narration.
    Info,
    /// Something unexpected but tolerated.
    Warn,
    /// A failure.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// A status event of one migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MigrationEvent {
    /// A phase boundary was crossed.
    #[serde(rename_all = "camelCase")]
    Phase {
        /// Reporting category (composite runs only).
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        /// Phase name.
        phase: String,
        /// 1-based ordinal.
        index: usize,
        /// Declared phase count.
        total: usize,
    },

    /// Self-reported progress.
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Reporting category (composite runs only).
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        /// Percentage in `[0, 100]`.
        progress: f64,
        /// Free-text status.
        message: String,
        /// Items processed so far.
        items_completed: u64,
        /// Items to process.
        items_total: u64,
        /// Bytes transferred so far.
        bytes_transferred: u64,
        /// Bytes to transfer.
        bytes_total: u64,
        /// Label of the item being processed.
        #[serde(skip_serializing_if = "Option::is_none")]
        current_item: Option<String>,
    },

    /// A log line.
    #[serde(rename_all = "camelCase")]
    Log {
        /// When the line was emitted.
        timestamp: DateTime<Utc>,
        /// Severity.
        level: LogLevel,
        /// Reporting category (composite runs only).
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        /// Free text.
        message: String,
    },

    /// The migration reached a terminal state. Always the last event.
    #[serde(rename_all = "camelCase")]
    Complete {
        /// Migration id.
        migration_id: String,
        /// Terminal state.
        status: MigrationStatus,
        /// Run duration in milliseconds.
        duration: u64,
        /// One-line outcome.
        summary: String,
    },

    /// A migration or one of its categories failed.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Migration id.
        migration_id: String,
        /// Failed category, `None` for the migration as a whole.
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        /// Error text.
        message: String,
        /// Whether sibling categories keep running.
        recoverable: bool,
    },
}

impl MigrationEvent {
    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationEvent::Phase { .. } => "phase",
            MigrationEvent::Progress { .. } => "progress",
            MigrationEvent::Log { .. } => "log",
            MigrationEvent::Complete { .. } => "complete",
            MigrationEvent::Error { .. } => "error",
        }
    }

    /// Category the event was reported for.
    pub fn category(&self) -> Option<&str> {
        match self {
            MigrationEvent::Phase { category, .. }
            | MigrationEvent::Progress { category, .. }
            | MigrationEvent::Log { category, .. }
            | MigrationEvent::Error { category, .. } => category.as_deref(),
            MigrationEvent::Complete { .. } => None,
        }
    }

    /// Whether no further events follow this one.
    pub fn is_final(&self) -> bool {
        matches!(self, MigrationEvent::Complete { .. })
    }
}

/// An event with its position in the migration's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Strictly increasing, starting at 1.
    pub seq: u64,
    /// The event itself.
    #[serde(flatten)]
    pub event: MigrationEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_event_shape() {
        let event = SequencedEvent {
            seq: 3,
            event: MigrationEvent::Phase {
                category: Some("database".to_string()),
                phase: "Create snapshot".to_string(),
                index: 2,
                total: 5,
            },
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "seq": 3,
                "type": "phase",
                "category": "database",
                "phase": "Create snapshot",
                "index": 2,
                "total": 5,
            })
        );
    }

    #[test]
    fn test_progress_event_uses_camel_case() {
        let event = MigrationEvent::Progress {
            category: None,
            progress: 40.0,
            message: "copying objects".to_string(),
            items_completed: 4,
            items_total: 10,
            bytes_transferred: 0,
            bytes_total: 0,
            current_item: Some("logo.png".to_string()),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["itemsCompleted"], 4);
        assert_eq!(value["currentItem"], "logo.png");
        assert!(value.get("category").is_none());
    }

    #[test]
    fn test_event_accessors() {
        let complete = MigrationEvent::Complete {
            migration_id: "m-1".to_string(),
            status: MigrationStatus::Completed,
            duration: 1200,
            summary: "done".to_string(),
        };
        assert_eq!(complete.kind(), "complete");
        assert!(complete.is_final());
        assert_eq!(complete.category(), None);

        let error = MigrationEvent::Error {
            migration_id: "m-1".to_string(),
            category: Some("queue".to_string()),
            message: "broker unreachable".to_string(),
            recoverable: true,
        };
        assert_eq!(error.category(), Some("queue"));
        assert!(!error.is_final());
    }

    #[test]
    fn test_log_level_order() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
