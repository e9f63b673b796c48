//! Tally Server - HTTP ingestion for time-bucketed counters

mod api;

use anyhow::Context;
use std::sync::Arc;
use tally_core::appender::StoreLayer;
use tally_core::config::TallyConfig;
use tally_core::counting::CounterService;
use tally_core::locking::LockService;
use tally_core::session::{Keyspace, MemorySession, Session};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Config file path: `TALLY_CONFIG`, else the first argument
fn config_path() -> Option<String> {
    std::env::var("TALLY_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
}

fn load_config() -> anyhow::Result<TallyConfig> {
    let config = match config_path() {
        Some(path) => TallyConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => TallyConfig::default(),
    };
    config
        .with_env_overrides()
        .context("Invalid environment override")
}

/// Install the global subscriber, storing events too when the appender is enabled
fn init_tracing(config: &TallyConfig, keyspace: &Keyspace) -> anyhow::Result<Option<StoreLayer>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.logging.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let store_layer = if config.appender.enabled {
        Some(StoreLayer::new(keyspace.clone(), config.appender.clone())?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(store_layer.clone())
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(store_layer)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // Initialize session
    let session = Arc::new(MemorySession::new(config.keyspace.session_config())?);
    let keyspace = Keyspace::new(config.keyspace.name.clone(), session.clone())?;

    // Initialize logging
    let store_layer = init_tracing(&config, &keyspace)?;

    info!("Starting Tally server...");
    info!(
        "Keyspace: {} (replication factor {})",
        config.keyspace.name, config.keyspace.replication_factor
    );
    info!(
        "Counters: table {} at {}",
        config.counters.table, config.counters.consistency
    );

    let counters = CounterService::new(keyspace, config.counters.clone())?;
    let state = Arc::new(api::AppContext {
        counters,
        session: session.clone(),
        locks: LockService::local(config.locks.prefix.clone()),
    });

    // Create router
    let app = api::create_router(state);

    // Start server
    let address = config.server.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Tally server listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    if let Some(layer) = store_layer {
        layer.flush()?;
    }
    session.shutdown()?;

    Ok(())
}
