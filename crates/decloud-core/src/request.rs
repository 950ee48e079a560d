//! Migration requests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::config::MigrationConfig;

/// Type name recorded for multi-category runs.
pub const COMPOSITE_TYPE: &str = "composite";

/// Top-level grouping of migration types.
///
/// The declaration order is the order in which a composite run starts its
/// categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Relational and document databases.
    Database,
    /// Object storage.
    Storage,
    /// Message queues and streams.
    Queue,
    /// In-memory caches.
    Cache,
    /// Identity providers and user pools.
    Auth,
    /// Secrets and certificates.
    Secrets,
    /// DNS zones.
    Dns,
    /// Serverless functions.
    Functions,
}

impl Category {
    /// Every category, in start order.
    pub const ALL: [Category; 8] = [
        Category::Database,
        Category::Storage,
        Category::Queue,
        Category::Cache,
        Category::Auth,
        Category::Secrets,
        Category::Dns,
        Category::Functions,
    ];

    /// Lowercase name used as the category progress key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Database => "database",
            Category::Storage => "storage",
            Category::Queue => "queue",
            Category::Cache => "cache",
            Category::Auth => "auth",
            Category::Secrets => "secrets",
            Category::Dns => "dns",
            Category::Functions => "functions",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// The executor and configuration chosen for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPlan {
    /// Executor type to run.
    #[serde(rename = "type")]
    pub migration_type: String,
    /// Source, destination and options for this category.
    #[serde(flatten)]
    pub config: MigrationConfig,
    /// Disabled categories are skipped and excluded from overall progress.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CategoryPlan {
    /// An enabled plan.
    pub fn new(migration_type: impl Into<String>, config: MigrationConfig) -> Self {
        Self {
            migration_type: migration_type.into(),
            config,
            enabled: true,
        }
    }

    /// Disable this category.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A run spanning several categories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeRequest {
    /// Plan per category.
    pub categories: BTreeMap<Category, CategoryPlan>,
    /// Keep running sibling categories after one fails.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl CompositeRequest {
    /// An empty request that stops on the first failure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a category plan.
    pub fn with_category(mut self, category: Category, plan: CategoryPlan) -> Self {
        self.categories.insert(category, plan);
        self
    }

    /// Set the failure policy.
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Enabled categories in start order.
    pub fn enabled(&self) -> impl Iterator<Item = (Category, &CategoryPlan)> {
        self.categories
            .iter()
            .filter(|(_, plan)| plan.enabled)
            .map(|(category, plan)| (*category, plan))
    }
}

/// What a caller asks the orchestrator to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MigrationRequest {
    /// Several categories, each with its own executor.
    Composite(CompositeRequest),
    /// One executor.
    Single {
        /// Executor type.
        #[serde(rename = "type")]
        migration_type: String,
        /// Source, destination and options.
        #[serde(flatten)]
        config: MigrationConfig,
    },
}

impl MigrationRequest {
    /// A single-executor request.
    pub fn single(migration_type: impl Into<String>, config: MigrationConfig) -> Self {
        MigrationRequest::Single {
            migration_type: migration_type.into(),
            config,
        }
    }

    /// Type recorded on the migration.
    pub fn migration_type(&self) -> &str {
        match self {
            MigrationRequest::Single { migration_type, .. } => migration_type,
            MigrationRequest::Composite(_) => COMPOSITE_TYPE,
        }
    }
}

impl From<CompositeRequest> for MigrationRequest {
    fn from(request: CompositeRequest) -> Self {
        MigrationRequest::Composite(request)
    }
}
