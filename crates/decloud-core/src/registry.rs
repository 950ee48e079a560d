//! Executor registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::executor::Executor;

/// A registered type and its progress skeleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTypeInfo {
    #[serde(rename = "type")]
    pub migration_type: String,
    pub phases: Vec<String>,
}

/// Maps migration type identifiers to executors.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own type. A later registration of the
    /// same type replaces the earlier one.
    pub fn register(&mut self, executor: impl Executor + 'static) {
        self.register_arc(Arc::new(executor));
    }

    pub fn register_arc(&mut self, executor: Arc<dyn Executor>) {
        let migration_type = executor.migration_type().to_string();
        if self
            .executors
            .insert(migration_type.clone(), executor)
            .is_some()
        {
            tracing::warn!(migration_type = %migration_type, "replacing registered executor");
        } else {
            tracing::debug!(migration_type = %migration_type, "registered executor");
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, executor: impl Executor + 'static) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, migration_type: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(migration_type).cloned()
    }

    /// Look up an executor, failing with [`Error::UnknownMigrationType`].
    pub fn resolve(&self, migration_type: &str) -> Result<Arc<dyn Executor>> {
        self.get(migration_type)
            .ok_or_else(|| Error::UnknownMigrationType(migration_type.to_string()))
    }

    /// Every registered type with its phases, sorted by type.
    pub fn types(&self) -> Vec<MigrationTypeInfo> {
        let mut types: Vec<MigrationTypeInfo> = self
            .executors
            .iter()
            .map(|(migration_type, executor)| MigrationTypeInfo {
                migration_type: migration_type.clone(),
                phases: executor.phases(),
            })
            .collect();
        types.sort_by(|a, b| a.migration_type.cmp(&b.migration_type));
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.executors.keys().collect();
        types.sort();
        f.debug_struct("ExecutorRegistry")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::context::ExecutionContext;
    use crate::validation::ValidationResult;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Named(&'static str, &'static [&'static str]);

    #[async_trait]
    impl Executor for Named {
        fn migration_type(&self) -> &str {
            self.0
        }

        fn phases(&self) -> Vec<String> {
            self.1.iter().map(|p| p.to_string()).collect()
        }

        async fn validate(
            &self,
            _cancel: &CancellationToken,
            _config: &MigrationConfig,
        ) -> Result<ValidationResult> {
            Ok(ValidationResult::new())
        }

        async fn execute(&self, _ctx: &ExecutionContext, _config: &MigrationConfig) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = ExecutorRegistry::new().with(Named("redis", &["dump"]));

        assert!(registry.resolve("redis").is_ok());
        let err = registry.resolve("memcached").err().unwrap();
        assert_eq!(err.to_string(), "unknown migration type: memcached");
    }

    #[test]
    fn test_types_are_sorted_with_phases() {
        let registry = ExecutorRegistry::new()
            .with(Named("sqs-to-rabbitmq", &["connect", "drain"]))
            .with(Named("rds-to-postgres", &["dump", "restore", "verify"]));

        let types = registry.types();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].migration_type, "rds-to-postgres");
        assert_eq!(types[0].phases, vec!["dump", "restore", "verify"]);
        assert_eq!(types[1].phases.len(), 2);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Named("redis", &["dump"]));
        registry.register(Named("redis", &["dump", "load"]));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("redis").unwrap().phases().len(), 2);
    }
}
