//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn Store>,
    pub scheduler: Arc<Scheduler>,
}

/// Web server for the dashboard and its JSON API.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<dyn Store>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
            },
        }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = routes(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Build the router with all routes.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Pages
        .route("/", get(handlers::handle_dashboard))
        .route("/historico", get(handlers::handle_history_page))
        // Sites and types
        .route(
            "/api/sites",
            get(handlers::handle_get_sites).post(handlers::handle_create_site),
        )
        .route(
            "/api/sites/{id}",
            put(handlers::handle_update_site).delete(handlers::handle_delete_site),
        )
        .route(
            "/api/tipos",
            get(handlers::handle_get_types).post(handlers::handle_create_type),
        )
        .route(
            "/api/tipos/{id}",
            put(handlers::handle_update_type).delete(handlers::handle_delete_type),
        )
        // Checks and history
        .route("/api/verificar", get(handlers::handle_run_checks))
        .route("/api/monitoramento", get(handlers::handle_get_statuses))
        .route("/api/historico", get(handlers::handle_offline_history))
        .route("/api/slow-historico", get(handlers::handle_slow_history))
        .route("/api/log/{kind}", get(handlers::handle_download_log))
        .route("/api/health", get(handlers::handle_health))
        .route("/favicon.ico", get(handlers::handle_favicon))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}
