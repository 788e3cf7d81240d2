//! HTTP API over the monitoring engine.

mod handlers;

pub use handlers::*;

use crate::analytics::Analytics;
use crate::config::ServerConfig;
use crate::scheduler::Scheduler;

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
    pub scheduler: Arc<Scheduler>,
    pub analytics: Analytics,
}

/// Web server for sitewatch.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, scheduler: Arc<Scheduler>) -> Self {
        let analytics = Analytics::new(scheduler.store().clone());
        Self {
            config,
            state: AppState {
                scheduler,
                analytics,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::handle_health))
        // Registry
        .route(
            "/api/websites",
            get(handlers::handle_list_websites).post(handlers::handle_add_website),
        )
        .route("/api/websites/{name}", axum::routing::delete(handlers::handle_delete_website))
        .route("/api/websites/{name}/history", get(handlers::handle_history))
        .route("/api/websites/{name}/export", get(handlers::handle_export))
        // Checks
        .route("/api/check/{name}", get(handlers::handle_check_one))
        .route("/api/check-all", post(handlers::handle_check_all))
        // Analytics
        .route("/api/stats", get(handlers::handle_stats))
        .route("/api/analytics/summary", get(handlers::handle_summary))
        .route("/api/analytics/global", get(handlers::handle_global_uptime))
        .route("/api/analytics/{name}/uptime", get(handlers::handle_uptime))
        .route("/api/analytics/{name}/response-time", get(handlers::handle_response_time))
        .route("/api/analytics/{name}/trend", get(handlers::handle_trend))
        .route("/api/analytics/{name}/complete", get(handlers::handle_complete))
        // Alerts and maintenance
        .route("/api/alerts", get(handlers::handle_alerts))
        .route("/api/retention/sweep", post(handlers::handle_sweep))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
