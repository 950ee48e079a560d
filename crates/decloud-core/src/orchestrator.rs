//! Submission, lookup, cancellation and retention of migrations.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{note_warnings, Dispatcher};
use crate::error::{Error, Result};
use crate::record::{MigrationRecord, DEFAULT_EVENT_CAPACITY};
use crate::registry::{ExecutorRegistry, MigrationTypeInfo};
use crate::request::MigrationRequest;
use crate::state::Migration;
use crate::store::MigrationStore;
use crate::validation::ValidationResult;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of each migration's live event channel.
    pub event_capacity: usize,
    /// Maximum categories of one composite run executing at once.
    pub max_concurrent_categories: Option<usize>,
    /// How long terminal migrations are kept before cleanup drops them.
    pub retention: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_concurrent_categories: None,
            retention: Duration::from_secs(3600),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_max_concurrent_categories(mut self, max: Option<usize>) -> Self {
        self.max_concurrent_categories = max;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Owns every migration of a reporting session.
pub struct Orchestrator {
    dispatcher: Dispatcher,
    store: MigrationStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(registry: ExecutorRegistry, config: OrchestratorConfig) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(registry))
            .with_max_concurrent_categories(config.max_concurrent_categories);
        Self {
            dispatcher,
            store: MigrationStore::new(),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Registered types with their phases.
    pub fn types(&self) -> Vec<MigrationTypeInfo> {
        self.dispatcher.registry().types()
    }

    /// Validate a request without creating a migration.
    pub async fn validate(&self, request: &MigrationRequest) -> Result<ValidationResult> {
        self.dispatcher
            .validate(request, &CancellationToken::new())
            .await
    }

    /// Validate, create and start a migration in the background.
    ///
    /// Nothing is stored when validation fails.
    pub async fn submit(&self, request: MigrationRequest) -> Result<Arc<MigrationRecord>> {
        let record = self.accept(request).await?;
        let dispatcher = self.dispatcher.clone();
        let running = record.clone();
        tokio::spawn(async move {
            dispatcher.run_validated(running).await;
        });
        Ok(record)
    }

    /// Validate, create and run a migration to completion.
    pub async fn run(&self, request: MigrationRequest) -> Result<Arc<MigrationRecord>> {
        let record = self.accept(request).await?;
        self.dispatcher.run_validated(record.clone()).await;
        Ok(record)
    }

    async fn accept(&self, request: MigrationRequest) -> Result<Arc<MigrationRecord>> {
        let result = self.validate(&request).await?;
        if !result.is_valid() {
            return Err(Error::ValidationFailed(result));
        }

        let record = Arc::new(MigrationRecord::new(request, self.config.event_capacity));
        note_warnings(&record, &result);
        self.store.insert(record.clone());
        tracing::info!(
            migration_id = %record.id(),
            migration_type = %record.request().migration_type(),
            "migration accepted"
        );
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<Arc<MigrationRecord>> {
        self.store
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// All retained migrations, oldest first.
    pub fn list(&self) -> Vec<Arc<MigrationRecord>> {
        self.store.list()
    }

    /// Request cancellation. Returns whether this call set the flag.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.cancel())
    }

    /// Request cancellation of every live migration.
    pub fn cancel_all(&self) -> usize {
        self.store
            .list()
            .iter()
            .filter(|record| record.cancel())
            .count()
    }

    /// Discard a terminal migration and return its final state.
    pub fn acknowledge(&self, id: &str) -> Result<Migration> {
        match self.store.remove_terminal(id) {
            Some(Ok(record)) => {
                tracing::debug!(migration_id = %id, "migration acknowledged");
                Ok(record.snapshot())
            }
            Some(Err(_)) => Err(Error::StillRunning(id.to_string())),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Drop terminal migrations older than the retention window.
    pub fn cleanup_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let removed = self
            .store
            .remove_completed_before(chrono::Utc::now() - retention);
        if removed > 0 {
            tracing::info!(removed, "dropped expired migrations");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
