//! linkwatch - network link health monitoring service.

use linkwatch::config::ServerConfig;
use linkwatch::db::Store;
use linkwatch::health::HealthAggregator;
use linkwatch::monitor::EndpointMonitor;
use linkwatch::probe::SystemProbe;
use linkwatch::profile::ProfileTable;
use linkwatch::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("linkwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting linkwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let profiles = match &cfg.profiles_path {
        Some(path) => {
            tracing::info!("Loading media profiles from {}", path.display());
            ProfileTable::load(path)?
        }
        None => ProfileTable::default(),
    };

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    tracing::info!("Probe mode: {}", cfg.probe_mode);
    let executor = Arc::new(SystemProbe::new(cfg.probe_mode));
    let monitor = EndpointMonitor::new(executor, Arc::new(profiles), store.clone());
    let aggregator = HealthAggregator::new(store.clone());

    // Start web server
    let server = Server::new(cfg, store, monitor, aggregator);
    server.start().await?;

    Ok(())
}
