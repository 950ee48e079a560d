//! decloud server binary.

use std::sync::Arc;

use clap::Parser;
use decloud_core::{CommandRecipe, ExecutorRegistry, Orchestrator};
use decloud_server::{create_router, AppState, Args};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decloud_server=info,decloud_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting decloud server");

    let config = Args::parse().into_config();

    let mut registry = ExecutorRegistry::new();
    match &config.recipes_path {
        Some(path) => {
            for recipe in CommandRecipe::from_json_file(path)? {
                registry.register(recipe);
            }
        }
        None => tracing::warn!("no recipe file given, no migration types are registered"),
    }
    info!(
        listen = %config.listen_addr,
        migration_types = registry.len(),
        max_concurrent_categories = ?config.max_concurrent_categories,
        "configuration loaded"
    );

    let orchestrator = Arc::new(Orchestrator::new(registry, config.orchestrator_config()));

    if let Some(interval) = config.cleanup_interval {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.cleanup_expired();
            }
        });
    }

    let app = create_router(AppState::new(orchestrator.clone(), config.clone()));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await?;

    info!("server shutdown complete");
    Ok(())
}

/// Wait for ctrl+c, then cancel every live migration so open event streams
/// can finish.
async fn shutdown_signal(orchestrator: Arc<Orchestrator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    let cancelled = orchestrator.cancel_all();
    info!(cancelled, "received shutdown signal");
}
