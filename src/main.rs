//! sitewatch - website availability monitor
//!
//! Probes registered sites on a fixed interval, records every check,
//! mails an alert when a site changes between UP and DOWN, and serves
//! uptime analytics over HTTP.

mod alert;
mod analytics;
mod config;
mod db;
mod export;
mod probe;
mod scheduler;
mod transition;
mod web;

#[cfg(test)]
mod testing;

use alert::{AlertDispatcher, EmailNotifier, Notifier};
use config::ServerConfig;
use db::Store;
use probe::HttpProbe;
use scheduler::{Scheduler, SchedulerSettings};
use transition::TransitionDetector;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sitewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting sitewatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let probe = Arc::new(HttpProbe::new(cfg.probe_timeout())?);

    let notifier: Option<Arc<dyn Notifier>> = match &cfg.smtp {
        Some(smtp) => match EmailNotifier::new(smtp) {
            Ok(email) => {
                tracing::info!("Alert mail enabled via {}:{}", smtp.host, smtp.port);
                Some(Arc::new(email))
            }
            Err(e) => {
                tracing::warn!("Alert mail disabled: {}", e);
                None
            }
        },
        None => None,
    };
    let dispatcher = AlertDispatcher::new(notifier);
    if !dispatcher.is_enabled() {
        tracing::info!("Alerting disabled, transitions will only be logged");
    }

    let scheduler = Arc::new(Scheduler::new(
        store,
        probe,
        dispatcher,
        TransitionDetector::new(cfg.alert_on_first_check),
        SchedulerSettings::from(&cfg),
    ));
    scheduler.start();

    // Start web server
    let server = Server::new(cfg, scheduler);
    server.start().await?;

    Ok(())
}
