//! diffwatch server
//!
//! Run with: cargo run
//!
//! See `diffwatch::config` for the environment variables. `RUST_LOG`
//! controls log output (default: diffwatch=info,tower_http=info).
//!
//! Tables for the built-in in-memory source are loaded over HTTP with
//! `POST /sources/:locator/tables/:table`.

use std::sync::Arc;

use diffwatch::alerts::{AlertDispatcher, ChannelConfig, ChannelKind};
use diffwatch::api::{run_server, AppState};
use diffwatch::config::{AppConfig, Bootstrap};
use diffwatch::monitor::{Evaluator, Monitor};
use diffwatch::scheduler::MonitorScheduler;
use diffwatch::source::MemoryCatalog;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diffwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("diffwatch configuration:");
    tracing::info!("  Host: {}:{}", config.server.host, config.server.port);
    tracing::info!(
        "  Poll interval: {} ms",
        config.scheduler.poll_interval.as_millis()
    );
    tracing::info!(
        "  Error backoff: {} ms",
        config.scheduler.error_backoff.as_millis()
    );
    tracing::info!("  History limit: {}", config.history_limit);

    let catalog = MemoryCatalog::new();
    let evaluator = Evaluator::new(Arc::new(catalog.clone()), Arc::new(catalog.clone()));
    let monitor = Arc::new(Monitor::with_evaluator(evaluator, config.history_limit));

    let dispatcher = Arc::new(AlertDispatcher::with_history_limit(config.history_limit));
    dispatcher.register(ChannelConfig::new(ChannelKind::Log))?;

    let bootstrap = match &config.bootstrap {
        Some(path) => {
            tracing::info!("  Bootstrap file: {}", path.display());
            Bootstrap::load(path)?
        }
        None => Bootstrap::default(),
    };
    bootstrap.apply(&monitor, &dispatcher)?;

    let scheduler = Arc::new(MonitorScheduler::with_config(
        Arc::clone(&monitor),
        Arc::clone(&dispatcher),
        config.scheduler.clone(),
    ));
    if bootstrap.autostart {
        scheduler.start();
    }

    let state = Arc::new(AppState {
        monitor,
        dispatcher,
        scheduler,
        catalog,
    });

    run_server(config.server, state).await
}
