mod audit;
mod bot;
mod broadcast;
mod commands;
mod config;
mod health;
mod reaction;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::audit::ReactionLog;
use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reactobot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bot tokens: {}", config.telegram.bot_tokens.len());
    info!("  Trusted operator: {}", config.telegram.owner_id);
    info!("  Audit database: {}", config.audit.database_path.display());
    info!("  Health port: {}", config.health.port);

    let audit = ReactionLog::open(&config.audit.database_path)?;

    let tokens = config.telegram.bot_tokens.clone();
    let state = Arc::new(AppState::new(config, audit));

    let shutdown = CancellationToken::new();

    let health_listener = health::bind(state.config.health.port).await?;
    tokio::spawn(health::serve(health_listener, shutdown.clone()));

    // Ctrl-C flips the shutdown token for every connection loop.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    info!("Starting {} bot connections", tokens.len());
    let mut connections = Vec::new();
    for token in tokens {
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        connections.push(tokio::spawn(async move {
            bot::run_connection(state, token, shutdown).await
        }));
    }

    for result in join_all(connections).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Connection task failed: {:#}", e),
            Err(e) => error!("Connection task panicked: {}", e),
        }
    }

    // Let in-flight message handlers and reactions finish before exiting.
    state.handlers.close();
    state.handlers.wait().await;

    info!("All connections stopped");
    Ok(())
}
