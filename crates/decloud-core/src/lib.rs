//! decloud core - migration orchestration.
//!
//! This crate provides the executor contract, the migration lifecycle, the
//! live event protocol, cooperative cancellation and the aggregation of
//! category-level migrations into one composite run.

pub mod aggregate;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod executor;
pub mod orchestrator;
pub mod process;
pub mod recipe;
pub mod record;
pub mod registry;
pub mod request;
pub mod state;
pub mod status;
pub mod store;
pub mod validation;

pub use aggregate::CategoryAggregator;
pub use config::{
    BagView, ConfigBag, ConfigError, ConfigSchema, KeySpec, MigrationConfig, Section, ValueKind,
};
pub use context::ExecutionContext;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use event::{LogLevel, MigrationEvent, SequencedEvent};
pub use executor::{ExecutionOutcome, Executor};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use process::{run_command, CommandOutput};
pub use recipe::{CommandRecipe, CommandStep, RecipeDefinition};
pub use record::{MigrationRecord, DEFAULT_EVENT_CAPACITY};
pub use registry::{ExecutorRegistry, MigrationTypeInfo};
pub use request::{Category, CategoryPlan, CompositeRequest, MigrationRequest, COMPOSITE_TYPE};
pub use state::{
    CategoryProgress, Migration, MigrationStatus, PhaseMarker, ProgressCounters,
};
pub use status::StatusReport;
pub use store::MigrationStore;
pub use validation::ValidationResult;

/// Re-export so executors need not depend on `async-trait` directly.
pub use async_trait::async_trait;
