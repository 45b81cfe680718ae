//! Airlink API Server binary.
//!
//! Entry point for the WebSocket hub and management API.

use std::sync::Arc;

use airlink_api::{Broker, MemoryBroker, RedisBroker, Server, ServerConfig, UnavailableAssistant};
use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,airlink_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    let broker: Arc<dyn Broker> = match &config.redis_url {
        Some(url) => {
            let redis = RedisBroker::new(url, config.presence_ttl)
                .context("failed to create Redis broker")?;
            if let Err(e) = redis.ping().await {
                tracing::warn!("Redis not reachable yet, cross-instance delivery degraded: {}", e);
            }
            tracing::info!("Using Redis broker");
            Arc::new(redis)
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-memory broker");
            Arc::new(MemoryBroker::new(config.presence_ttl))
        }
    };

    tracing::info!(
        "Starting Airlink API server on {}:{}",
        config.host,
        config.port
    );

    let server = Server::new(config, Some(broker), Arc::new(UnavailableAssistant));
    server.run(shutdown_signal()).await?;

    tracing::info!("Airlink API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
