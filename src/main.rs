//! sitewatch - Site Status Dashboard
//!
//! Periodically checks a list of web sites, classifies each one as online,
//! slow, rate limited or offline, and keeps a ledger of outages.

mod config;
mod db;
mod history;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use history::IncidentTracker;
use probe::{ProbeSettings, SiteProber};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sitewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting sitewatch on port {}...", cfg.http_port);
    for warning in cfg.validate() {
        tracing::warn!("Configuration: {}", warning);
    }

    // Open storage
    let store = db::open_store(&cfg)?;
    tracing::info!("Storage initialized ({})", store.backend_name());

    let prober = Arc::new(SiteProber::new(ProbeSettings::from_config(&cfg))?);
    let tracker = Arc::new(tokio::sync::Mutex::new(IncidentTracker::new(store.clone())));

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        prober,
        tracker,
        cfg.incident_policy,
        Duration::from_secs(cfg.check_interval_secs),
    ));
    scheduler.start();

    // Start web server
    let server = Server::new(cfg, store, scheduler.clone());
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    scheduler.stop();

    Ok(())
}
