//! The executor contract.
//!
//! Every recipe implements [`Executor`]. The core knows nothing about the
//! recipe's vocabulary: it asks for the phase list, validates, and then
//! executes with an [`ExecutionContext`] through which all status flows.

use async_trait::async_trait;
use std::any::Any;
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::state::MigrationStatus;
use crate::validation::ValidationResult;

/// A migration recipe.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Identifier the registry resolves requests by.
    fn migration_type(&self) -> &str;

    /// Ordered phase names. Phase `i` of a run is reported with index `i + 1`.
    fn phases(&self) -> Vec<String>;

    /// Pre-flight check of `config`.
    ///
    /// Must be fast and free of remote side effects. Missing required keys
    /// are errors; missing recommended keys are warnings.
    async fn validate(
        &self,
        cancel: &CancellationToken,
        config: &MigrationConfig,
    ) -> Result<ValidationResult>;

    /// Do the work.
    ///
    /// Report each phase through [`ExecutionContext::phase`], which also
    /// returns [`Error::Cancelled`](crate::Error::Cancelled) once
    /// cancellation has been requested. Pass the context's token to any
    /// subprocess so it is killed promptly.
    async fn execute(&self, ctx: &ExecutionContext, config: &MigrationConfig) -> Result<()>;
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl ExecutionOutcome {
    /// Classify an executor's return value.
    ///
    /// The cancellation error, or any result after the executor observed
    /// cancellation, is `Cancelled`. Every other error is `Failed`.
    pub fn classify(result: Result<()>, cancel_observed: bool) -> Self {
        match result {
            Ok(()) if cancel_observed => ExecutionOutcome::Cancelled,
            Ok(()) => ExecutionOutcome::Completed,
            Err(e) if e.is_cancelled() || cancel_observed => ExecutionOutcome::Cancelled,
            Err(e) => ExecutionOutcome::Failed(e.to_string()),
        }
    }

    /// Outcome of an executor that panicked.
    pub fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ExecutionOutcome::Failed(format!("executor panicked: {message}"))
    }

    /// Terminal status for this outcome.
    pub fn status(&self) -> MigrationStatus {
        match self {
            ExecutionOutcome::Completed => MigrationStatus::Completed,
            ExecutionOutcome::Failed(_) => MigrationStatus::Failed,
            ExecutionOutcome::Cancelled => MigrationStatus::Cancelled,
        }
    }

    /// Error text of a failure.
    pub fn error(&self) -> Option<String> {
        match self {
            ExecutionOutcome::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_classify() {
        assert_eq!(
            ExecutionOutcome::classify(Ok(()), false),
            ExecutionOutcome::Completed
        );
        assert_eq!(
            ExecutionOutcome::classify(Ok(()), true),
            ExecutionOutcome::Cancelled
        );
        assert_eq!(
            ExecutionOutcome::classify(Err(Error::Cancelled), false),
            ExecutionOutcome::Cancelled
        );
        assert_eq!(
            ExecutionOutcome::classify(Err(Error::execution("disk full")), false),
            ExecutionOutcome::Failed("execution failed: disk full".to_string())
        );
    }

    #[test]
    fn test_panic_payloads() {
        let outcome = ExecutionOutcome::panicked(Box::new("boom"));
        assert_eq!(outcome.error().as_deref(), Some("executor panicked: boom"));

        let outcome = ExecutionOutcome::panicked(Box::new(String::from("bad index")));
        assert_eq!(outcome.status(), MigrationStatus::Failed);
        assert_eq!(outcome.error().as_deref(), Some("executor panicked: bad index"));
    }
}
