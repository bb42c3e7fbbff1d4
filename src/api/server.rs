use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_rule, delete_channel, delete_rule, drop_table, get_rule, health_check, list_alerts,
    list_channels, list_results, list_rules, list_tables, load_table, next_run, register_channel,
    run_rule, scheduler_status, start_scheduler, stop_scheduler, AppState,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Rules
        .route("/rules", get(list_rules).post(add_rule))
        .route("/rules/:name", get(get_rule).delete(delete_rule))
        .route("/rules/:name/run", post(run_rule))
        .route("/rules/:name/next-run", get(next_run))
        .route("/results", get(list_results))
        // Scheduler
        .route("/scheduler", get(scheduler_status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        // Alerts
        .route("/channels", get(list_channels).post(register_channel))
        .route("/channels/:kind", axum::routing::delete(delete_channel))
        .route("/alerts", get(list_alerts))
        // In-memory sources
        .route("/sources", get(list_tables))
        .route(
            "/sources/:locator/tables/:table",
            post(load_table).delete(drop_table),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server until Ctrl+C, then stop the scheduler
pub async fn run_server(
    config: ServerConfig,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = Arc::clone(&state.scheduler);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting diffwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;

    tracing::info!("diffwatch server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");

    tracing::info!("Shutdown signal received, stopping scheduler...");
}
