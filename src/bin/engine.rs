//! Blackjack Engine Worker
//!
//! One sequential queue consumer. Run as many of these as you need;
//! the per-session lock serializes writers across all of them.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blackjack::config::Config;
use blackjack::engine::Engine;
use blackjack::store::RedisStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid environment configuration")?;
    info!("Blackjack Engine v{}", blackjack::VERSION);
    info!("Store: {}", config.redis_url);

    let store = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("failed to connect to the coordination store")?,
    );

    let engine = Engine::new(store, config.lock.clone());
    engine.run().await.context("consume loop terminated")?;
    Ok(())
}
