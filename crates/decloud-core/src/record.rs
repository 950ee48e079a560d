//! The synchronized owner of one migration's state.
//!
//! A [`MigrationRecord`] couples the mutable [`Migration`] snapshot with the
//! ordered event timeline, the live broadcast channel and the cancellation
//! token. Writers are the dispatcher and the executor's
//! [`ExecutionContext`](crate::ExecutionContext); readers take snapshots.
//!
//! Lock order is timeline, then state. Every event is sequenced and broadcast
//! while the timeline lock is held, so replay plus live subscription never
//! duplicates or skips an event. No lock is held across an `.await`.
//!
//! The timeline keeps every phase, log, error and complete event. A progress
//! event replaces the stored one directly before it when both belong to the
//! same category, so replay holds the latest tick of each progress run while
//! live subscribers still receive every tick.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::event::{LogLevel, MigrationEvent, SequencedEvent};
use crate::request::MigrationRequest;
use crate::state::{
    CategoryProgress, Migration, MigrationStatus, PhaseMarker, ProgressCounters,
};
use crate::status::StatusReport;

/// Default capacity of the live event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Default)]
struct Timeline {
    events: Vec<SequencedEvent>,
    next_seq: u64,
    sealed: bool,
}

/// One migration run, shared between the dispatcher, its executor and any
/// number of status readers.
pub struct MigrationRecord {
    id: String,
    request: MigrationRequest,
    state: RwLock<Migration>,
    timeline: Mutex<Timeline>,
    events: broadcast::Sender<SequencedEvent>,
    cancel: CancellationToken,
}

impl MigrationRecord {
    /// Create a pending record with a fresh id.
    pub fn new(request: MigrationRequest, event_capacity: usize) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), request, event_capacity)
    }

    /// Create a pending record with the given id.
    pub fn with_id(id: impl Into<String>, request: MigrationRequest, event_capacity: usize) -> Self {
        let id = id.into();
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let state = Migration::new(id.clone(), request.migration_type());
        Self {
            id,
            request,
            state: RwLock::new(state),
            timeline: Mutex::new(Timeline {
                next_seq: 1,
                ..Default::default()
            }),
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &MigrationRequest {
        &self.request
    }

    /// Clone out the current state.
    pub fn snapshot(&self) -> Migration {
        self.state.read().clone()
    }

    pub fn status(&self) -> MigrationStatus {
        self.state.read().status
    }

    pub fn is_terminal(&self) -> bool {
        self.state.read().is_terminal()
    }

    /// Current state in the status query shape.
    pub fn status_report(&self) -> StatusReport {
        StatusReport::from(&*self.state.read())
    }

    /// Every stored event so far, in order.
    pub fn history(&self) -> Vec<SequencedEvent> {
        self.timeline.lock().events.clone()
    }

    /// Stored events with a sequence number above `seq`.
    pub fn history_after(&self, seq: u64) -> Vec<SequencedEvent> {
        let timeline = self.timeline.lock();
        let start = timeline.events.partition_point(|event| event.seq <= seq);
        timeline.events[start..].to_vec()
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SequencedEvent> {
        self.events.subscribe()
    }

    /// Atomically take the history and subscribe to everything after it.
    pub fn subscribe_with_history(
        &self,
    ) -> (Vec<SequencedEvent>, broadcast::Receiver<SequencedEvent>) {
        let timeline = self.timeline.lock();
        (timeline.events.clone(), self.events.subscribe())
    }

    /// Wait until the migration reaches a terminal state and return it.
    pub async fn wait(&self) -> Migration {
        let (history, mut rx) = self.subscribe_with_history();
        if !history.iter().any(|e| e.event.is_final()) {
            loop {
                match rx.recv().await {
                    Ok(event) if event.event.is_final() => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.is_terminal() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        self.snapshot()
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `true` for the first request on a non-terminal migration.
    /// Repeated requests and requests after completion are no-ops.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.state.write();
            if state.is_terminal() || state.cancel_requested {
                return false;
            }
            state.cancel_requested = true;
        }
        self.cancel.cancel();
        tracing::info!(migration_id = %self.id, "cancellation requested");
        self.record_log(None, LogLevel::Info, "cancellation requested");
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that fires when cancellation is requested.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create one pending progress entry per category.
    pub(crate) fn register_categories<'a>(&self, categories: impl IntoIterator<Item = &'a str>) {
        let mut state = self.state.write();
        for category in categories {
            state
                .category_progress
                .entry(category.to_string())
                .or_insert_with(CategoryProgress::new);
        }
    }

    /// Pending → Running.
    pub(crate) fn mark_running(&self) -> bool {
        let mut timeline = self.timeline.lock();
        let started = self.state.write().start();
        if started {
            tracing::info!(
                migration_id = %self.id,
                migration_type = %self.request.migration_type(),
                "migration started"
            );
            self.push(&mut timeline, log_event(None, LogLevel::Info, "migration started"));
        }
        started
    }

    /// Move the migration to a terminal state and close the timeline.
    ///
    /// The first terminal transition wins. It emits an error event for a
    /// failure and always ends with the complete event.
    pub(crate) fn finish(&self, status: MigrationStatus, error: Option<String>) -> bool {
        let mut timeline = self.timeline.lock();
        let (duration, summary) = {
            let mut state = self.state.write();
            if !state.finish(status, error.clone()) {
                return false;
            }
            (state.duration(), state.summary())
        };

        match status {
            MigrationStatus::Failed => {
                let message = error.unwrap_or_else(|| "migration failed".to_string());
                tracing::error!(migration_id = %self.id, error = %message, "migration failed");
                self.push(
                    &mut timeline,
                    log_event(None, LogLevel::Error, message.clone()),
                );
                self.push(
                    &mut timeline,
                    MigrationEvent::Error {
                        migration_id: self.id.clone(),
                        category: None,
                        message,
                        recoverable: false,
                    },
                );
            }
            MigrationStatus::Cancelled => {
                tracing::info!(migration_id = %self.id, "migration cancelled");
                self.push(
                    &mut timeline,
                    log_event(None, LogLevel::Info, "migration cancelled"),
                );
            }
            _ => {
                tracing::info!(
                    migration_id = %self.id,
                    duration_ms = duration.num_milliseconds(),
                    "migration completed"
                );
            }
        }

        self.push(
            &mut timeline,
            MigrationEvent::Complete {
                migration_id: self.id.clone(),
                status,
                duration: duration.num_milliseconds().max(0) as u64,
                summary,
            },
        );
        timeline.sealed = true;
        true
    }

    /// Pending → Running for one category.
    pub(crate) fn start_category(&self, category: &str) -> bool {
        let mut timeline = self.timeline.lock();
        if timeline.sealed {
            return false;
        }
        let started = {
            let mut state = self.state.write();
            let started = state
                .category_progress
                .get_mut(category)
                .is_some_and(CategoryProgress::start);
            if started {
                state.current_category = Some(category.to_string());
            }
            started
        };
        if started {
            tracing::debug!(migration_id = %self.id, category, "category started");
            self.push(
                &mut timeline,
                log_event(Some(category.to_string()), LogLevel::Info, "category started"),
            );
        }
        started
    }

    /// Move one category to a terminal state.
    ///
    /// `recoverable` tells subscribers whether sibling categories keep running
    /// after a failure.
    pub(crate) fn finish_category(
        &self,
        category: &str,
        status: MigrationStatus,
        error: Option<String>,
        recoverable: bool,
    ) -> bool {
        let mut timeline = self.timeline.lock();
        if timeline.sealed {
            return false;
        }
        let finished = self
            .state
            .write()
            .category_progress
            .get_mut(category)
            .is_some_and(|progress| progress.finish(status, error.clone()));
        if !finished {
            return false;
        }

        let cat = Some(category.to_string());
        match status {
            MigrationStatus::Failed => {
                let message = error.unwrap_or_else(|| "category failed".to_string());
                tracing::warn!(migration_id = %self.id, category, error = %message, "category failed");
                self.push(
                    &mut timeline,
                    MigrationEvent::Error {
                        migration_id: self.id.clone(),
                        category: cat,
                        message,
                        recoverable,
                    },
                );
            }
            MigrationStatus::Cancelled => {
                let message = error.unwrap_or_else(|| "category cancelled".to_string());
                tracing::info!(migration_id = %self.id, category, "category cancelled");
                self.push(&mut timeline, log_event(cat, LogLevel::Info, message));
            }
            _ => {
                tracing::debug!(migration_id = %self.id, category, "category completed");
                self.push(
                    &mut timeline,
                    log_event(cat, LogLevel::Info, "category completed"),
                );
            }
        }
        true
    }

    /// Record a phase boundary. The index must already be within range.
    pub(crate) fn record_phase(&self, category: Option<&str>, name: &str, index: usize, total: usize) {
        let mut timeline = self.timeline.lock();
        if timeline.sealed {
            return;
        }
        {
            let mut state = self.state.write();
            let marker = PhaseMarker {
                name: name.to_string(),
                index,
                total,
            };
            if let Some(progress) = category.and_then(|c| state.category_progress.get_mut(c)) {
                progress.current_phase = Some(marker.clone());
            }
            state.current_phase = Some(marker);
            state.current_category = category.map(str::to_string);
        }
        tracing::debug!(migration_id = %self.id, category, phase = name, index, total, "phase");
        self.push(
            &mut timeline,
            MigrationEvent::Phase {
                category: category.map(str::to_string),
                phase: name.to_string(),
                index,
                total,
            },
        );
    }

    /// Record a log line.
    pub(crate) fn record_log(&self, category: Option<&str>, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let mut timeline = self.timeline.lock();
        if timeline.sealed {
            return;
        }
        if category.is_some() {
            self.state.write().current_category = category.map(str::to_string);
        }
        tracing::debug!(migration_id = %self.id, category, level = %level, "{message}");
        self.push(&mut timeline, log_event(category.map(str::to_string), level, message));
    }

    /// Record a progress tick.
    ///
    /// `percent` is clamped to `[0, 100]`. Non-finite values are dropped and a
    /// decrease is logged but accepted. `update` adjusts the counters before
    /// the event is built.
    pub(crate) fn record_progress(
        &self,
        category: Option<&str>,
        percent: f64,
        message: &str,
        update: impl FnOnce(&mut ProgressCounters),
    ) {
        if !percent.is_finite() {
            tracing::warn!(migration_id = %self.id, category, percent, "ignoring non-finite progress");
            return;
        }
        let percent = percent.clamp(0.0, 100.0);

        let mut timeline = self.timeline.lock();
        if timeline.sealed {
            return;
        }
        let counters = {
            let mut state = self.state.write();
            let (progress, counters) = progress_slot(&mut state, category);
            let fraction = percent / 100.0;
            if fraction < *progress {
                tracing::warn!(
                    migration_id = %self.id,
                    category,
                    from = *progress * 100.0,
                    to = percent,
                    "progress decreased"
                );
            }
            *progress = fraction;
            update(counters);
            let counters = counters.clone();
            if category.is_some() {
                state.current_category = category.map(str::to_string);
            }
            state.refresh_estimate();
            counters
        };

        let superseded = timeline.events.last().is_some_and(|last| {
            matches!(&last.event, MigrationEvent::Progress { category: c, .. } if c.as_deref() == category)
        });
        if superseded {
            timeline.events.pop();
        }
        self.push(
            &mut timeline,
            MigrationEvent::Progress {
                category: category.map(str::to_string),
                progress: percent,
                message: message.to_string(),
                items_completed: counters.items_completed,
                items_total: counters.items_total,
                bytes_transferred: counters.bytes_transferred,
                bytes_total: counters.bytes_total,
                current_item: counters.current_item,
            },
        );
    }

    /// Adjust counters without emitting an event.
    pub(crate) fn update_counters(&self, category: Option<&str>, update: impl FnOnce(&mut ProgressCounters)) {
        let mut state = self.state.write();
        if state.is_terminal() {
            return;
        }
        let (_, counters) = progress_slot(&mut state, category);
        update(counters);
    }

    fn push(&self, timeline: &mut Timeline, event: MigrationEvent) {
        let sequenced = SequencedEvent {
            seq: timeline.next_seq,
            event,
        };
        timeline.next_seq += 1;
        timeline.events.push(sequenced.clone());
        // No receivers is fine; the timeline keeps the event for replay.
        let _ = self.events.send(sequenced);
    }
}

impl std::fmt::Debug for MigrationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRecord")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

fn log_event(category: Option<String>, level: LogLevel, message: impl Into<String>) -> MigrationEvent {
    MigrationEvent::Log {
        timestamp: Utc::now(),
        level,
        category,
        message: message.into(),
    }
}

/// Progress fraction and counters of a category, or of the whole run when
/// the category is absent or unknown.
fn progress_slot<'a>(
    migration: &'a mut Migration,
    category: Option<&str>,
) -> (&'a mut f64, &'a mut ProgressCounters) {
    let entry = match category {
        Some(category) => migration.category_progress.get_mut(category),
        None => None,
    };
    match entry {
        Some(progress) => (&mut progress.progress, &mut progress.counters),
        None => (&mut migration.progress, &mut migration.counters),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;

    fn record() -> MigrationRecord {
        MigrationRecord::with_id(
            "m-1",
            MigrationRequest::single("postgres", MigrationConfig::new()),
            16,
        )
    }

    fn kinds(record: &MigrationRecord) -> Vec<&'static str> {
        record.history().iter().map(|e| e.event.kind()).collect()
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let record = record();
        record.mark_running();
        record.record_phase(None, "dump", 1, 2);
        record.record_log(None, LogLevel::Info, "dumping");
        record.record_progress(None, 50.0, "half", |_| {});

        let seqs: Vec<u64> = record.history().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_finish_emits_complete_last() {
        let record = record();
        record.mark_running();
        assert!(record.finish(MigrationStatus::Failed, Some("pg_dump failed".to_string())));
        assert!(!record.finish(MigrationStatus::Completed, None));

        record.record_log(None, LogLevel::Info, "too late");
        record.record_phase(None, "restore", 2, 2);

        assert_eq!(kinds(&record), vec!["log", "log", "error", "complete"]);
        let last = record.history().pop().unwrap();
        match last.event {
            MigrationEvent::Complete { status, migration_id, .. } => {
                assert_eq!(status, MigrationStatus::Failed);
                assert_eq!(migration_id, "m-1");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(record.snapshot().error.as_deref(), Some("pg_dump failed"));
    }

    #[test]
    fn test_progress_is_clamped() {
        let record = record();
        record.mark_running();

        record.record_progress(None, 150.0, "over", |_| {});
        assert_eq!(record.snapshot().progress, 1.0);

        record.record_progress(None, -3.0, "under", |_| {});
        assert_eq!(record.snapshot().progress, 0.0);

        record.record_progress(None, f64::NAN, "nan", |_| {});
        assert_eq!(record.snapshot().progress, 0.0);
        assert_eq!(kinds(&record), vec!["log", "progress"]);
    }

    #[test]
    fn test_consecutive_progress_is_coalesced() {
        let record = record();
        record.register_categories(["database", "storage"]);
        record.mark_running();
        let mut rx = record.subscribe();

        for percent in [10.0, 20.0, 30.0] {
            record.record_progress(Some("storage"), percent, "copying", |_| {});
        }
        record.record_progress(Some("database"), 50.0, "dumping", |_| {});
        record.record_progress(Some("storage"), 40.0, "copying", |_| {});
        record.record_log(Some("storage"), LogLevel::Info, "bucket done");
        record.record_progress(Some("storage"), 50.0, "copying", |_| {});

        let progress: Vec<(Option<String>, f64)> = record
            .history()
            .into_iter()
            .filter_map(|e| match e.event {
                MigrationEvent::Progress { category, progress, .. } => Some((category, progress)),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![
                (Some("storage".to_string()), 30.0),
                (Some("database".to_string()), 50.0),
                (Some("storage".to_string()), 40.0),
                (Some("storage".to_string()), 50.0),
            ]
        );

        let seqs: Vec<u64> = record.history().iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));

        let mut live = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.event, MigrationEvent::Progress { .. }) {
                live += 1;
            }
        }
        assert_eq!(live, 6);
    }

    #[test]
    fn test_history_after() {
        let record = record();
        record.mark_running();
        record.record_phase(None, "dump", 1, 2);
        record.record_log(None, LogLevel::Info, "dumping");
        record.record_phase(None, "restore", 2, 2);

        let seqs: Vec<u64> = record.history_after(2).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(record.history_after(4).is_empty());
        assert_eq!(record.history_after(0).len(), 4);
    }

    #[test]
    fn test_category_start_is_reported() {
        let record = record();
        record.register_categories(["storage"]);
        record.mark_running();
        assert!(record.start_category("storage"));

        let last = record.history().pop().unwrap();
        assert_eq!(last.event.category(), Some("storage"));
        assert_eq!(last.event.kind(), "log");
        assert_eq!(
            record.snapshot().current_category.as_deref(),
            Some("storage")
        );
    }

    #[test]
    fn test_category_progress_is_routed() {
        let record = record();
        record.register_categories(["database", "storage"]);
        record.mark_running();
        assert!(record.start_category("storage"));
        assert!(!record.start_category("storage"));

        record.record_progress(Some("storage"), 40.0, "copying", |c| {
            c.items_completed = 4;
            c.items_total = 10;
        });

        let snapshot = record.snapshot();
        let storage = &snapshot.category_progress["storage"];
        assert_eq!(storage.progress, 0.4);
        assert_eq!(storage.counters.items_completed, 4);
        assert_eq!(snapshot.category_progress["database"].progress, 0.0);
        assert_eq!(snapshot.current_category.as_deref(), Some("storage"));
        assert!((snapshot.overall_progress() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_is_set_once() {
        let record = record();
        assert!(!record.is_cancel_requested());
        assert!(record.cancel());
        assert!(!record.cancel());
        assert!(record.is_cancel_requested());
        assert!(record.snapshot().cancel_requested);

        record.finish(MigrationStatus::Cancelled, None);
        assert_eq!(record.status(), MigrationStatus::Cancelled);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let record = record();
        record.mark_running();
        record.finish(MigrationStatus::Completed, None);

        assert!(!record.cancel());
        assert!(!record.is_cancel_requested());
    }

    #[tokio::test]
    async fn test_subscribe_with_history_has_no_gaps() {
        let record = record();
        record.mark_running();
        record.record_phase(None, "dump", 1, 2);

        let (history, mut rx) = record.subscribe_with_history();
        record.record_phase(None, "restore", 2, 2);
        record.finish(MigrationStatus::Completed, None);

        let mut seqs: Vec<u64> = history.iter().map(|e| e.seq).collect();
        loop {
            let event = rx.recv().await.unwrap();
            seqs.push(event.seq);
            if event.event.is_final() {
                break;
            }
        }
        let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn test_wait_returns_terminal_state() {
        let record = std::sync::Arc::new(record());
        record.mark_running();

        let waiter = {
            let record = record.clone();
            tokio::spawn(async move { record.wait().await })
        };
        tokio::task::yield_now().await;
        record.finish(MigrationStatus::Completed, None);

        let migration = waiter.await.unwrap();
        assert_eq!(migration.status, MigrationStatus::Completed);
        assert_eq!(record.wait().await.status, MigrationStatus::Completed);
    }
}
