//! Server configuration.

use clap::Parser;
use decloud_core::{OrchestratorConfig, DEFAULT_EVENT_CAPACITY};
use std::path::PathBuf;
use std::time::Duration;

/// Default address to listen on.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";

/// Default retention of finished migrations in seconds (1 hour).
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Default interval between cleanup runs in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// JSON file with command recipe definitions.
    pub recipes_path: Option<PathBuf>,
    /// Capacity of each migration's live event channel.
    pub event_capacity: usize,
    /// Maximum categories of one composite run executing at once.
    pub max_concurrent_categories: Option<usize>,
    /// How long finished migrations are kept before they are dropped.
    pub retention: Duration,
    /// Interval between cleanup runs. None disables cleanup.
    pub cleanup_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDRESS.to_string(),
            recipes_path: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_concurrent_categories: None,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            cleanup_interval: Some(Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS)),
        }
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_recipes_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.recipes_path = Some(path.into());
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_max_concurrent_categories(mut self, max: usize) -> Self {
        self.max_concurrent_categories = Some(max);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Disable periodic cleanup of finished migrations.
    pub fn without_cleanup(mut self) -> Self {
        self.cleanup_interval = None;
        self
    }

    /// Orchestrator settings derived from this configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_event_capacity(self.event_capacity)
            .with_max_concurrent_categories(self.max_concurrent_categories)
            .with_retention(self.retention)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "decloud-server")]
#[command(version, about = "decloud migration orchestrator", long_about = None)]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// JSON file with command recipe definitions.
    #[arg(short, long)]
    pub recipes: Option<PathBuf>,

    /// Buffered live events per migration.
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,

    /// Categories of one composite migration run at once (0 = unbounded).
    #[arg(long, default_value_t = 0)]
    pub max_concurrent_categories: usize,

    /// Seconds finished migrations are kept.
    #[arg(long, default_value_t = DEFAULT_RETENTION_SECS)]
    pub retention: u64,

    /// Seconds between cleanup runs. Set to 0 to disable cleanup.
    #[arg(long, default_value_t = DEFAULT_CLEANUP_INTERVAL_SECS)]
    pub cleanup_interval: u64,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::new()
            .with_listen_addr(self.listen)
            .with_event_capacity(self.event_capacity)
            .with_retention(Duration::from_secs(self.retention));

        if let Some(path) = self.recipes {
            config = config.with_recipes_path(path);
        }
        if self.max_concurrent_categories > 0 {
            config = config.with_max_concurrent_categories(self.max_concurrent_categories);
        }
        if self.cleanup_interval == 0 {
            config = config.without_cleanup();
        } else {
            config = config.with_cleanup_interval(Duration::from_secs(self.cleanup_interval));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDRESS);
        assert!(config.recipes_path.is_none());
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.retention, Duration::from_secs(DEFAULT_RETENTION_SECS));
        assert!(config.cleanup_interval.is_some());
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "decloud-server",
            "--listen",
            "127.0.0.1:9090",
            "--recipes",
            "recipes.json",
            "--max-concurrent-categories",
            "2",
            "--cleanup-interval",
            "0",
        ]);
        let config = args.into_config();

        assert_eq!(config.listen_addr, "127.0.0.1:9090");
        assert_eq!(config.recipes_path, Some(PathBuf::from("recipes.json")));
        assert_eq!(config.max_concurrent_categories, Some(2));
        assert!(config.cleanup_interval.is_none());
    }

    #[test]
    fn test_unbounded_categories_by_default() {
        let config = Args::parse_from(["decloud-server"]).into_config();
        assert!(config.max_concurrent_categories.is_none());

        let orchestrator = config.orchestrator_config();
        assert!(orchestrator.max_concurrent_categories.is_none());
        assert_eq!(orchestrator.retention, Duration::from_secs(DEFAULT_RETENTION_SECS));
    }
}
