//! Soilwatch - Soil Moisture and Pump Telemetry Service
//!
//! Ingests snapshots from watering controllers and serves current state,
//! statistics and windowed history.

mod config;
mod engine;
mod persist;
mod store;
mod web;

use config::ServerConfig;
use engine::{Engine, EngineConfig};
use persist::{MemoryBackend, PersistWriter};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("soilwatch=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Soilwatch on port {}...", cfg.http_port);
    tracing::info!("Using {:?} storage", cfg.storage);

    // Open persistence; an unusable store degrades to memory only
    let backend: Arc<dyn persist::Persistence> = match persist::open_backend(&cfg) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(
                "Failed to open {:?} storage, data will not survive a restart: {}",
                cfg.storage,
                e
            );
            Arc::new(MemoryBackend::default())
        }
    };

    // Initialize engine from stored state
    let engine = Arc::new(Engine::init(EngineConfig::from(&cfg), backend.as_ref()));

    // Start background persistence
    let writer = PersistWriter::new(engine.clone(), backend);
    writer.start().await;

    // Start web server
    let server = Server::new(cfg, engine);
    let result = server.start().await;

    // Final flush before exit
    writer.stop().await;

    result
}
