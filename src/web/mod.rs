//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::engine::Engine;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
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
    pub engine: Arc<Engine>,
}

/// Web server for Soilwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, engine: Arc<Engine>) -> Self {
        Self {
            state: AppState { config, engine },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/health", get(handlers::handle_health))
            // Device ingest
            .route("/api/watering-data", post(handlers::handle_ingest))
            // Reads
            .route("/api/sensor-data", get(handlers::handle_recent))
            .route("/api/stats", get(handlers::handle_stats))
            .route("/api/current-status", get(handlers::handle_current_status))
            .route("/api/historical-data", get(handlers::handle_historical))
            // Threshold mailbox
            .route("/api/thresholds", get(handlers::handle_get_thresholds))
            .route("/api/thresholds/{sensor_id}", post(handlers::handle_request_threshold))
            .route("/api/threshold-updates", get(handlers::handle_poll_threshold_updates))
            .route(
                "/api/clear-threshold-updates",
                post(handlers::handle_clear_threshold_updates),
            )
            .fallback(handlers::handle_not_found)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port. Returns after Ctrl-C.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
