//! Resolve, validate, execute.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::aggregate::CategoryAggregator;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::event::LogLevel;
use crate::executor::{ExecutionOutcome, Executor};
use crate::record::MigrationRecord;
use crate::registry::ExecutorRegistry;
use crate::request::MigrationRequest;
use crate::state::MigrationStatus;
use crate::validation::ValidationResult;

/// Drives a [`MigrationRecord`] through its lifecycle.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ExecutorRegistry>,
    aggregator: CategoryAggregator,
}

impl Dispatcher {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        let aggregator = CategoryAggregator::new(registry.clone());
        Self {
            registry,
            aggregator,
        }
    }

    /// Bound how many categories of a composite run execute at once.
    pub fn with_max_concurrent_categories(mut self, max: Option<usize>) -> Self {
        self.aggregator = self.aggregator.with_max_concurrency(max);
        self
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Look up the executor for a type.
    pub fn resolve(&self, migration_type: &str) -> Result<Arc<dyn Executor>> {
        self.registry.resolve(migration_type)
    }

    /// Pre-flight check of a request without touching any record.
    pub async fn validate(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        let result = match request {
            MigrationRequest::Single {
                migration_type,
                config,
            } => self.resolve(migration_type)?.validate(cancel, config).await?,
            MigrationRequest::Composite(composite) => {
                self.aggregator.validate(cancel, composite).await?
            }
        };

        if !result.is_valid() {
            tracing::warn!(
                migration_type = %request.migration_type(),
                errors = ?result.errors,
                "validation failed"
            );
        }
        Ok(result)
    }

    /// Validate the record's request and, if valid, run it to a terminal state.
    ///
    /// A rejected request leaves the record pending and returns
    /// [`Error::ValidationFailed`].
    pub async fn dispatch(&self, record: Arc<MigrationRecord>) -> Result<MigrationStatus> {
        let result = self
            .validate(record.request(), &record.cancellation_token())
            .await?;
        if !result.is_valid() {
            return Err(Error::ValidationFailed(result));
        }
        note_warnings(&record, &result);
        Ok(self.run_validated(record).await)
    }

    /// Run a record whose request has already passed validation.
    pub(crate) async fn run_validated(&self, record: Arc<MigrationRecord>) -> MigrationStatus {
        if record.is_cancel_requested() {
            record.finish(MigrationStatus::Cancelled, None);
            return record.status();
        }
        if !record.mark_running() {
            tracing::warn!(migration_id = %record.id(), status = %record.status(), "migration already started");
            return record.status();
        }

        let outcome = match record.request() {
            MigrationRequest::Single {
                migration_type,
                config,
            } => match self.resolve(migration_type) {
                Ok(executor) => {
                    let ctx = ExecutionContext::new(record.clone(), None, executor.phases());
                    let result = AssertUnwindSafe(executor.execute(&ctx, config))
                        .catch_unwind()
                        .await;
                    match result {
                        Ok(result) => ExecutionOutcome::classify(result, ctx.cancel_observed()),
                        Err(payload) => ExecutionOutcome::panicked(payload),
                    }
                }
                Err(e) => ExecutionOutcome::Failed(e.to_string()),
            },
            MigrationRequest::Composite(composite) => {
                self.aggregator.run(&record, composite).await
            }
        };

        record.finish(outcome.status(), outcome.error());
        record.status()
    }
}

/// Carry validation warnings into the migration's log.
pub(crate) fn note_warnings(record: &MigrationRecord, result: &ValidationResult) {
    for warning in &result.warnings {
        record.record_log(None, LogLevel::Warn, warning.clone());
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
