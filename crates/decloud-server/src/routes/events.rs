//! Live event stream.
//!
//! `GET /migrations/:id/events` replays the migration's timeline and then
//! follows it live. Each SSE message carries the event kind as its name, the
//! sequence number as its id and the event JSON as its data. The stream ends
//! after the complete event.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use decloud_core::{MigrationRecord, SequencedEvent};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::AppError;
use crate::AppState;

/// Event stream routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/migrations/:id/events", get(stream_events))
}

async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let record = state.orchestrator.get(&id)?;
    let (history, rx) = record.subscribe_with_history();
    let last_seq = history.last().map_or(0, |event| event.seq);
    let finished = history.iter().any(|event| event.event.is_final());

    tracing::debug!(
        migration_id = %id,
        replayed = history.len(),
        finished,
        "event stream opened"
    );

    let live = follow(record, rx, last_seq, finished);
    let events = stream::iter(history)
        .chain(live)
        .map(|event| Ok(to_sse(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

struct Follower {
    record: Arc<MigrationRecord>,
    rx: broadcast::Receiver<SequencedEvent>,
    last_seq: u64,
    finished: bool,
    backlog: VecDeque<SequencedEvent>,
}

impl Follower {
    async fn next(&mut self) -> Option<SequencedEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                if event.seq > self.last_seq {
                    return Some(self.advance(event));
                }
                continue;
            }
            if self.finished {
                return None;
            }
            match self.rx.recv().await {
                Ok(event) if event.seq <= self.last_seq => continue,
                Ok(event) => return Some(self.advance(event)),
                Err(RecvError::Lagged(skipped)) => {
                    // Events the channel dropped are still in the timeline.
                    self.backlog = self.record.history_after(self.last_seq).into();
                    tracing::warn!(
                        migration_id = %self.record.id(),
                        skipped,
                        backfilled = self.backlog.len(),
                        "event stream lagged, backfilling from history"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn advance(&mut self, event: SequencedEvent) -> SequencedEvent {
        self.last_seq = event.seq;
        self.finished = event.event.is_final();
        event
    }
}

/// Live events after `last_seq`, ending with the complete event.
///
/// A receiver that falls behind the broadcast channel resumes from the
/// record's stored history, so it never skips a log, phase or error event.
pub(crate) fn follow(
    record: Arc<MigrationRecord>,
    rx: broadcast::Receiver<SequencedEvent>,
    last_seq: u64,
    finished: bool,
) -> impl Stream<Item = SequencedEvent> {
    let follower = Follower {
        record,
        rx,
        last_seq,
        finished,
        backlog: VecDeque::new(),
    };
    stream::unfold(follower, |mut follower| async move {
        let event = follower.next().await?;
        Some((event, follower))
    })
}

fn to_sse(event: &SequencedEvent) -> Event {
    let sse = Event::default()
        .event(event.event.kind())
        .id(event.seq.to_string());
    match sse.json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            tracing::error!(seq = event.seq, error = %e, "failed to encode event");
            Event::default()
                .event("error")
                .id(event.seq.to_string())
                .data("event could not be encoded")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloud_core::{
        async_trait, ExecutionContext, Executor, ExecutorRegistry, MigrationConfig,
        MigrationEvent, MigrationRequest, MigrationStatus, Orchestrator, OrchestratorConfig,
        Result, ValidationResult,
    };
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    const LINES: usize = 50;

    /// Waits for a signal, then logs faster than a small channel can hold.
    struct Chatty {
        resume: Arc<Notify>,
    }

    #[async_trait]
    impl Executor for Chatty {
        fn migration_type(&self) -> &str {
            "chatty"
        }

        fn phases(&self) -> Vec<String> {
            vec!["copy".to_string()]
        }

        async fn validate(
            &self,
            _cancel: &CancellationToken,
            _config: &MigrationConfig,
        ) -> Result<ValidationResult> {
            Ok(ValidationResult::new())
        }

        async fn execute(&self, ctx: &ExecutionContext, _config: &MigrationConfig) -> Result<()> {
            self.resume.notified().await;
            ctx.phase("copy", 1)?;
            for line in 0..LINES {
                ctx.info(format!("line {line}"));
                ctx.progress_items(line as u64 + 1, LINES as u64, "copying");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lagging_follower_is_backfilled() {
        let resume = Arc::new(Notify::new());
        let registry = ExecutorRegistry::new().with(Chatty {
            resume: resume.clone(),
        });
        let orchestrator =
            Orchestrator::new(registry, OrchestratorConfig::default().with_event_capacity(2));

        let record = orchestrator
            .submit(MigrationRequest::single("chatty", MigrationConfig::new()))
            .await
            .unwrap();
        let (history, rx) = record.subscribe_with_history();
        let last_seq = history.last().map_or(0, |event| event.seq);

        resume.notify_one();
        let migration = tokio::time::timeout(Duration::from_secs(10), record.wait())
            .await
            .unwrap();
        assert_eq!(migration.status, MigrationStatus::Completed);

        let followed: Vec<SequencedEvent> = tokio::time::timeout(
            Duration::from_secs(5),
            follow(record.clone(), rx, last_seq, false).collect(),
        )
        .await
        .unwrap();

        let lines: Vec<String> = followed
            .iter()
            .filter_map(|e| match &e.event {
                MigrationEvent::Log { message, .. } if message.starts_with("line ") => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..LINES).map(|line| format!("line {line}")).collect();
        assert_eq!(lines, expected);

        assert!(followed.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(followed.iter().all(|e| e.seq > last_seq));
        assert!(followed.last().unwrap().event.is_final());
    }
}
