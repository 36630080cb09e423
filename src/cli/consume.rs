//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了热度消费命令的实现。

use super::offline::OfflineSource;
use crate::backend::RedisStore;
use crate::config::{Config, StoreBackend};
use crate::manager::FeedManager;
use crate::metrics::get_metrics_string;
use crate::sync::RedisStreamSubscription;
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub async fn execute(path: &Path) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if config.store.backend != StoreBackend::Redis {
        bail!("the consume command needs store.backend = \"redis\"");
    }

    let store = RedisStore::connect(&config.store.redis)
        .await
        .context("Failed to connect to Redis")?;
    let subscription = RedisStreamSubscription::connect(&store, &config.heat.channel)
        .await
        .context("Failed to subscribe to the heat stream")?;
    let manager = FeedManager::new(config, Arc::new(store), Arc::new(OfflineSource), None)?;

    let shutdown = manager.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping consumer");
            shutdown.cancel();
        }
    });

    manager
        .heat_consumer()
        .run(subscription, manager.shutdown_token())
        .await?;
    manager.shutdown().await;

    println!("{}", get_metrics_string());
    Ok(())
}
