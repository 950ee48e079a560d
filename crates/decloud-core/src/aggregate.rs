//! Composite migrations spanning several categories.
//!
//! Each enabled category resolves its own executor and runs as its own tokio
//! task with its own [`ExecutionContext`], so its reports land in its own
//! [`CategoryProgress`](crate::CategoryProgress) entry. Categories start in
//! [`Category`] order, at most `max_concurrency` at a time.
//!
//! A category that has not started when cancellation is requested, or when a
//! sibling fails under `continue_on_error = false`, is marked cancelled and
//! never becomes running. In-flight categories only stop for a user
//! cancellation.

use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::executor::{ExecutionOutcome, Executor};
use crate::record::MigrationRecord;
use crate::registry::ExecutorRegistry;
use crate::request::{Category, CompositeRequest};
use crate::state::MigrationStatus;
use crate::validation::ValidationResult;

/// Runs composite requests against a registry.
#[derive(Clone)]
pub struct CategoryAggregator {
    registry: Arc<ExecutorRegistry>,
    max_concurrency: Option<usize>,
}

impl CategoryAggregator {
    /// Create an aggregator without a concurrency bound.
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            registry,
            max_concurrency: None,
        }
    }

    /// Bound how many categories execute at once. `None` or `0` is unbounded.
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max.filter(|n| *n > 0);
        self
    }

    /// Validate every enabled category.
    ///
    /// Messages are prefixed with the category name. An unknown executor type
    /// is an error rather than a validation finding.
    pub async fn validate(
        &self,
        cancel: &CancellationToken,
        request: &CompositeRequest,
    ) -> Result<ValidationResult> {
        let mut merged = ValidationResult::new();
        if request.enabled().next().is_none() {
            merged.add_error("no categories enabled");
        }

        for (category, plan) in request.enabled() {
            let executor = self.registry.resolve(&plan.migration_type)?;
            let result = executor.validate(cancel, &plan.config).await?;
            merged.merge_scoped(category.as_str(), result);
        }

        Ok(merged)
    }

    /// Run every enabled category of an already validated request.
    ///
    /// Returns the outcome of the migration as a whole: failed if any
    /// category failed, otherwise cancelled if any category was cancelled,
    /// otherwise completed. The caller records the terminal state.
    pub async fn run(
        &self,
        record: &Arc<MigrationRecord>,
        request: &CompositeRequest,
    ) -> ExecutionOutcome {
        let mut queue: VecDeque<(Category, Option<Arc<dyn Executor>>, MigrationConfig)> = request
            .enabled()
            .map(|(category, plan)| {
                (
                    category,
                    self.registry.get(&plan.migration_type),
                    plan.config.clone(),
                )
            })
            .collect();
        record.register_categories(queue.iter().map(|(category, _, _)| category.as_str()));

        let limit = self.max_concurrency.unwrap_or(usize::MAX);
        let continue_on_error = request.continue_on_error;
        let mut halted = false;
        let mut started: Vec<Category> = Vec::new();
        let mut tasks: JoinSet<(Category, ExecutionOutcome)> = JoinSet::new();

        loop {
            while tasks.len() < limit {
                let Some((category, executor, config)) = queue.pop_front() else {
                    break;
                };

                if record.is_cancel_requested() {
                    record.finish_category(category.as_str(), MigrationStatus::Cancelled, None, false);
                    continue;
                }
                if halted {
                    record.finish_category(
                        category.as_str(),
                        MigrationStatus::Cancelled,
                        Some("skipped after a sibling category failed".to_string()),
                        false,
                    );
                    continue;
                }
                let Some(executor) = executor else {
                    // The type was registered at validation time; treat a
                    // vanished executor as this category's failure.
                    record.finish_category(
                        category.as_str(),
                        MigrationStatus::Failed,
                        Some(format!("unknown migration type for {category}")),
                        continue_on_error,
                    );
                    halted |= !continue_on_error;
                    continue;
                };

                record.start_category(category.as_str());
                started.push(category);
                let ctx = ExecutionContext::new(record.clone(), Some(category.as_str()), executor.phases());
                tasks.spawn(async move {
                    let result = AssertUnwindSafe(executor.execute(&ctx, &config))
                        .catch_unwind()
                        .await;
                    let outcome = match result {
                        Ok(result) => ExecutionOutcome::classify(result, ctx.cancel_observed()),
                        Err(payload) => ExecutionOutcome::panicked(payload),
                    };
                    (category, outcome)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok((category, outcome)) => {
                    record.finish_category(
                        category.as_str(),
                        outcome.status(),
                        outcome.error(),
                        continue_on_error,
                    );
                    if outcome.status() == MigrationStatus::Failed && !continue_on_error {
                        halted = true;
                    }
                }
                Err(e) => {
                    tracing::error!(migration_id = %record.id(), error = %e, "category task ended abnormally");
                    halted |= !continue_on_error;
                }
            }
        }

        // No-op for every category that reported back.
        for category in started {
            record.finish_category(
                category.as_str(),
                MigrationStatus::Failed,
                Some("category task ended abnormally".to_string()),
                continue_on_error,
            );
        }

        fold(record)
    }
}

/// Fold category statuses into the migration outcome.
fn fold(record: &MigrationRecord) -> ExecutionOutcome {
    let snapshot = record.snapshot();
    let mut failures: Vec<(&String, &Vec<String>)> = snapshot
        .category_progress
        .iter()
        .filter(|(_, progress)| progress.status == MigrationStatus::Failed)
        .map(|(name, progress)| (name, &progress.errors))
        .collect();

    if !failures.is_empty() {
        failures.sort();
        let message = failures
            .iter()
            .map(|(name, errors)| match errors.last() {
                Some(error) => format!("{name}: {error}"),
                None => format!("{name}: failed"),
            })
            .collect::<Vec<_>>()
            .join("; ");
        return ExecutionOutcome::Failed(message);
    }

    if snapshot
        .category_progress
        .values()
        .any(|progress| progress.status == MigrationStatus::Cancelled)
    {
        return ExecutionOutcome::Cancelled;
    }

    ExecutionOutcome::Completed
}
