//! decloud HTTP/JSON server.
//!
//! Exposes the migration orchestrator over REST: submission, status queries,
//! cancellation, acknowledgement and a server-sent event stream per
//! migration.

pub mod config;
pub mod error;
pub mod json;
pub mod routes;

pub use config::{Args, ServerConfig};
pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use decloud_core::Orchestrator;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Owner of every migration.
    pub orchestrator: Arc<Orchestrator>,
    /// Server configuration.
    pub config: ServerConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(orchestrator: Arc<Orchestrator>, config: ServerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::migrations::routes())
        .merge(routes::events::routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
