//! Blackjack Gateway
//!
//! Client-facing WebSocket process: registers player identities,
//! enqueues their actions, and fans out redacted session events.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blackjack::config::Config;
use blackjack::gateway::Gateway;
use blackjack::store::RedisStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid environment configuration")?;
    info!("Blackjack Gateway v{}", blackjack::VERSION);
    info!("Store: {}", config.redis_url);

    let store = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("failed to connect to the coordination store")?,
    );

    let gateway = Gateway::new(store, config.gateway());
    gateway.run().await.context("gateway terminated")?;
    Ok(())
}
