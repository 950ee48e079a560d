//! The emission API handed to executors.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::event::LogLevel;
use crate::process::{self, CommandOutput};
use crate::record::MigrationRecord;

/// Per-execution handle through which an executor reports phases, logs and
/// progress, and observes cancellation.
///
/// Composite runs hand each category its own context, so every report is
/// attributed to the right category without the executor knowing about it.
pub struct ExecutionContext {
    record: Arc<MigrationRecord>,
    category: Option<String>,
    phases: Vec<String>,
    token: CancellationToken,
    last_phase: AtomicUsize,
    cancel_observed: AtomicBool,
}

impl ExecutionContext {
    /// Create a context for `record`, optionally scoped to one category.
    pub fn new(record: Arc<MigrationRecord>, category: Option<&str>, phases: Vec<String>) -> Self {
        let token = record.cancellation_token();
        Self {
            record,
            category: category.map(str::to_string),
            phases,
            token,
            last_phase: AtomicUsize::new(0),
            cancel_observed: AtomicBool::new(false),
        }
    }

    pub fn migration_id(&self) -> &str {
        self.record.id()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Declared phases of the executor.
    pub fn phases(&self) -> &[String] {
        &self.phases
    }

    /// Report entering phase `index` (1-based).
    ///
    /// This is the cancellation safe point: once cancellation has been
    /// requested it emits nothing and returns [`Error::Cancelled`]. Indices
    /// outside `1..=phases().len()` are clamped; a decreasing index or a name
    /// that differs from the declared phase is logged and tolerated.
    pub fn phase(&self, name: &str, index: usize) -> Result<()> {
        self.check_cancelled()?;

        let total = self.phases.len();
        if total == 0 {
            tracing::warn!(
                migration_id = %self.record.id(),
                category = self.category(),
                phase = name,
                "phase reported by an executor without declared phases"
            );
            return Ok(());
        }

        let clamped = index.clamp(1, total);
        if clamped != index {
            tracing::warn!(
                migration_id = %self.record.id(),
                category = self.category(),
                index,
                total,
                "phase index out of range, clamped"
            );
        }

        let previous = self.last_phase.swap(clamped, Ordering::SeqCst);
        if clamped < previous {
            tracing::warn!(
                migration_id = %self.record.id(),
                category = self.category(),
                previous,
                index = clamped,
                "phase index went backwards"
            );
        }
        if self.phases[clamped - 1] != name {
            tracing::warn!(
                migration_id = %self.record.id(),
                category = self.category(),
                expected = %self.phases[clamped - 1],
                phase = name,
                "phase name differs from declared phase"
            );
        }

        self.record.record_phase(self.category(), name, clamped, total);
        Ok(())
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.record.record_log(self.category(), level, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Report completion as a percentage in `[0, 100]`.
    pub fn progress(&self, percent: f64, message: impl AsRef<str>) {
        self.record
            .record_progress(self.category(), percent, message.as_ref(), |_| {});
    }

    /// Report completion as a count of items.
    pub fn progress_items(&self, completed: u64, total: u64, message: impl AsRef<str>) {
        self.record.record_progress(
            self.category(),
            ratio(completed, total),
            message.as_ref(),
            |counters| {
                counters.items_completed = completed;
                counters.items_total = total;
            },
        );
    }

    /// Report completion as a count of bytes.
    pub fn progress_bytes(&self, transferred: u64, total: u64, message: impl AsRef<str>) {
        self.record.record_progress(
            self.category(),
            ratio(transferred, total),
            message.as_ref(),
            |counters| {
                counters.bytes_transferred = transferred;
                counters.bytes_total = total;
            },
        );
    }

    /// Set the label of the item being processed. Emits no event; the label
    /// rides along with the next progress report.
    pub fn set_current_item(&self, item: impl Into<String>) {
        let item = item.into();
        self.record
            .update_counters(self.category(), |counters| counters.current_item = Some(item));
    }

    /// Non-blocking cancellation check.
    pub fn is_cancelled(&self) -> bool {
        let cancelled = self.token.is_cancelled();
        if cancelled {
            self.cancel_observed.store(true, Ordering::SeqCst);
        }
        cancelled
    }

    /// Return [`Error::Cancelled`] if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Whether the executor saw the cancellation request.
    pub fn cancel_observed(&self) -> bool {
        self.cancel_observed.load(Ordering::SeqCst)
    }

    /// Token to thread into long-running I/O.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run an external command, killing it if cancellation is requested.
    pub async fn run_command(&self, command: Command) -> Result<CommandOutput> {
        let result = process::run_command(command, &self.token).await;
        if matches!(result, Err(Error::Cancelled)) {
            self.cancel_observed.store(true, Ordering::SeqCst);
        }
        result
    }
}

fn ratio(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    done as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::event::MigrationEvent;
    use crate::request::MigrationRequest;
    use crate::state::MigrationStatus;

    fn context() -> ExecutionContext {
        let record = Arc::new(MigrationRecord::with_id(
            "m-1",
            MigrationRequest::single("s3-to-minio", MigrationConfig::new()),
            16,
        ));
        record.mark_running();
        ExecutionContext::new(
            record,
            None,
            vec!["list".to_string(), "copy".to_string(), "verify".to_string()],
        )
    }

    fn phase_indices(ctx: &ExecutionContext) -> Vec<(String, usize, usize)> {
        ctx.record
            .history()
            .into_iter()
            .filter_map(|e| match e.event {
                MigrationEvent::Phase { phase, index, total, .. } => Some((phase, index, total)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_phase_index_is_clamped() {
        let ctx = context();
        ctx.phase("list", 0).unwrap();
        ctx.phase("verify", 7).unwrap();

        assert_eq!(
            phase_indices(&ctx),
            vec![("list".to_string(), 1, 3), ("verify".to_string(), 3, 3)]
        );
        let marker = ctx.record.snapshot().current_phase.unwrap();
        assert_eq!(marker.index, 3);
    }

    #[test]
    fn test_phase_going_backwards_is_recorded() {
        let ctx = context();
        ctx.phase("list", 1).unwrap();
        ctx.phase("copy", 2).unwrap();
        ctx.phase("list", 1).unwrap();
        ctx.phase("list", 1).unwrap();

        assert_eq!(
            phase_indices(&ctx),
            vec![
                ("list".to_string(), 1, 3),
                ("copy".to_string(), 2, 3),
                ("list".to_string(), 1, 3),
                ("list".to_string(), 1, 3),
            ]
        );
        let marker = ctx.record.snapshot().current_phase.unwrap();
        assert_eq!(marker.name, "list");
        assert_eq!(marker.index, 1);
    }

    #[test]
    fn test_phase_after_cancel_emits_nothing() {
        let ctx = context();
        ctx.phase("list", 1).unwrap();
        ctx.record.cancel();

        let err = ctx.phase("copy", 2).unwrap_err();
        assert!(err.is_cancelled());
        assert!(ctx.cancel_observed());
        assert_eq!(phase_indices(&ctx).len(), 1);
    }

    #[test]
    fn test_progress_items_counters() {
        let ctx = context();
        ctx.set_current_item("orders-queue");
        ctx.progress_items(3, 4, "draining");

        let event = ctx.record.history().pop().unwrap().event;
        match event {
            MigrationEvent::Progress {
                progress,
                items_completed,
                items_total,
                current_item,
                message,
                ..
            } => {
                assert_eq!(progress, 75.0);
                assert_eq!(items_completed, 3);
                assert_eq!(items_total, 4);
                assert_eq!(current_item.as_deref(), Some("orders-queue"));
                assert_eq!(message, "draining");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(ctx.record.snapshot().progress, 0.75);
    }

    #[test]
    fn test_progress_decrease_is_accepted() {
        let ctx = context();
        let mut rx = ctx.record.subscribe();
        ctx.progress(60.0, "copying");
        ctx.progress(40.0, "rescanning");

        let mut reported = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let MigrationEvent::Progress { progress, message, .. } = event.event {
                reported.push((progress, message));
            }
        }
        assert_eq!(
            reported,
            vec![(60.0, "copying".to_string()), (40.0, "rescanning".to_string())]
        );
        assert_eq!(ctx.record.snapshot().progress, 0.4);
    }

    #[test]
    fn test_tiny_byte_progress_keeps_running() {
        let ctx = context();
        ctx.progress_bytes(1, 1_000_000_000_000_000_000, "copying");

        let snapshot = ctx.record.snapshot();
        assert_eq!(snapshot.status, MigrationStatus::Running);
        assert_eq!(snapshot.counters.bytes_transferred, 1);
        assert!(snapshot.progress > 0.0);
    }

    #[test]
    fn test_progress_bytes_with_unknown_total() {
        let ctx = context();
        ctx.progress_bytes(512, 0, "streaming");

        let snapshot = ctx.record.snapshot();
        assert_eq!(snapshot.progress, 0.0);
        assert_eq!(snapshot.counters.bytes_transferred, 512);
    }

    #[test]
    fn test_logs_keep_fifo_order() {
        let ctx = context();
        ctx.info("first");
        ctx.warn("second");
        ctx.error("third");

        let messages: Vec<(LogLevel, String)> = ctx
            .record
            .history()
            .into_iter()
            .filter_map(|e| match e.event {
                MigrationEvent::Log { level, message, .. } => Some((level, message)),
                _ => None,
            })
            .skip(1)
            .collect();
        assert_eq!(
            messages,
            vec![
                (LogLevel::Info, "first".to_string()),
                (LogLevel::Warn, "second".to_string()),
                (LogLevel::Error, "third".to_string()),
            ]
        );
    }
}
